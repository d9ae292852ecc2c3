//
// backend.rs
//
// Copyright (C) 2022-2026 Posit Software, PBC. All rights reserved.
// Modifications copyright (C) 2026 Jonathan Marc Bearak
//

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::Client;
use tower_lsp::LanguageServer;
use tower_lsp::LspService;
use tower_lsp::Server;

use crate::config::{parse_server_config, ServerConfig};
use crate::handlers;
use crate::workspace::Workspace;
use crate::workspace_manager::WorkspaceManager;

/// Settings arrive either as the bare `referenceIndex` object holder or
/// nested under the client's `bsl` section
fn config_from_settings(settings: &Value) -> Option<ServerConfig> {
    parse_server_config(settings).or_else(|| settings.get("bsl").and_then(parse_server_config))
}

fn folder_path(uri: &Url) -> Option<PathBuf> {
    match uri.to_file_path() {
        Ok(path) => Some(path),
        Err(()) => {
            log::warn!("Ignoring non-file workspace folder: {}", uri);
            None
        }
    }
}

/// Populate a workspace from its root on the blocking pool
fn spawn_populate(workspace: Arc<Workspace>) {
    tokio::spawn(async move {
        let root = workspace.root().map(|r| r.display().to_string()).unwrap_or_default();
        let result = tokio::task::spawn_blocking(move || workspace.populate_from_root()).await;
        match result {
            Ok(Ok(count)) => log::info!("Indexed {} documents under {}", count, root),
            Ok(Err(err)) => log::warn!("Failed to index {}: {err:#}", root),
            Err(err) => log::error!("Indexing task for {} failed: {}", root, err),
        }
    });
}

pub struct Backend {
    client: Client,
    workspaces: Arc<WorkspaceManager>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            workspaces: Arc::new(WorkspaceManager::new(ServerConfig::default())),
        }
    }

    /// Workspace owning `uri`, once every edit submitted for it is applied
    async fn synced_workspace(&self, uri: &Url) -> Arc<Workspace> {
        let workspace = self.workspaces.workspace_for(uri);
        workspace.await_latest(uri).await;
        workspace
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        log::info!("Initializing bsl-ls");

        if let Some(config) = params.initialization_options.as_ref().and_then(config_from_settings) {
            self.workspaces.set_config(config);
        }

        #[allow(deprecated)]
        let folders: Vec<Url> = match params.workspace_folders {
            Some(folders) => folders.into_iter().map(|f| f.uri).collect(),
            None => params.root_uri.into_iter().collect(),
        };
        for folder in folders {
            if let Some(path) = folder_path(&folder) {
                self.workspaces.add_workspace(path);
            }
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::INCREMENTAL),
                    ..Default::default()
                })),
                document_symbol_provider: Some(OneOf::Left(true)),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                rename_provider: Some(OneOf::Right(RenameOptions {
                    prepare_provider: Some(true),
                    work_done_progress_options: Default::default(),
                })),
                call_hierarchy_provider: Some(CallHierarchyServerCapability::Simple(true)),
                workspace: Some(WorkspaceServerCapabilities {
                    workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                        supported: Some(true),
                        change_notifications: Some(OneOf::Left(true)),
                    }),
                    file_operations: None,
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: String::from("bsl-ls"),
                version: Some(String::from(env!("CARGO_PKG_VERSION"))),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("bsl-ls initialized");

        if !self.workspaces.config().index_workspace {
            log::info!("Workspace indexing disabled");
            return;
        }
        for workspace in self.workspaces.all() {
            if workspace.root().is_some() {
                spawn_populate(workspace);
            }
        }
        self.client
            .log_message(MessageType::INFO, "bsl-ls: indexing workspace folders")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        log::info!("bsl-ls shutting down");
        self.workspaces.shutdown();
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        let workspace = self.workspaces.workspace_for(&document.uri);
        workspace.open_document(&document.uri, &document.text, document.version);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = &params.text_document.uri;
        log::trace!("didChange {} v{} ({} changes)", uri, params.text_document.version, params.content_changes.len());
        self.workspaces
            .workspace_for(uri)
            .submit(uri, params.text_document.version, params.content_changes);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = &params.text_document.uri;
        self.workspaces.workspace_for(uri).close_document(uri).await;
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        log::trace!("Configuration changed");
        match config_from_settings(&params.settings) {
            Some(config) => self.workspaces.set_config(config),
            None => log::warn!("No referenceIndex section in settings, keeping the current configuration"),
        }
    }

    async fn did_change_workspace_folders(&self, params: DidChangeWorkspaceFoldersParams) {
        for folder in &params.event.removed {
            if let Some(path) = folder_path(&folder.uri) {
                self.workspaces.remove_workspace(&path);
            }
        }
        let index_workspace = self.workspaces.config().index_workspace;
        for folder in &params.event.added {
            if let Some(path) = folder_path(&folder.uri) {
                let workspace = self.workspaces.add_workspace(path);
                if index_workspace {
                    spawn_populate(workspace);
                }
            }
        }
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        log::trace!("Received watched files change: {} changes", params.changes.len());
        let config = self.workspaces.config();

        for change in params.changes {
            let uri = &change.uri;
            let Ok(path) = uri.to_file_path() else {
                continue;
            };
            if !config.accepts_extension(&path) {
                continue;
            }
            let workspace = self.workspaces.workspace_for(uri);
            // Open documents are authoritative
            if workspace.is_open(uri) {
                log::trace!("Skipping watched file change for open document: {}", uri);
                continue;
            }
            match change.typ {
                FileChangeType::CREATED | FileChangeType::CHANGED => {
                    workspace.refresh_from_disk(uri).await;
                }
                FileChangeType::DELETED => {
                    workspace.remove_document(uri);
                }
                _ => {}
            }
        }
    }

    async fn document_symbol(&self, params: DocumentSymbolParams) -> Result<Option<DocumentSymbolResponse>> {
        let uri = &params.text_document.uri;
        let workspace = self.synced_workspace(uri).await;
        Ok(handlers::document_symbol(&workspace, uri))
    }

    async fn goto_definition(&self, params: GotoDefinitionParams) -> Result<Option<GotoDefinitionResponse>> {
        let position = params.text_document_position_params;
        let workspace = self.synced_workspace(&position.text_document.uri).await;
        Ok(handlers::goto_definition(&workspace, &position.text_document.uri, position.position))
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let position = params.text_document_position;
        let workspace = self.synced_workspace(&position.text_document.uri).await;
        Ok(handlers::references(
            &workspace,
            &position.text_document.uri,
            position.position,
            params.context.include_declaration,
        ))
    }

    async fn prepare_rename(&self, params: TextDocumentPositionParams) -> Result<Option<PrepareRenameResponse>> {
        let workspace = self.synced_workspace(&params.text_document.uri).await;
        Ok(handlers::prepare_rename(&workspace, &params.text_document.uri, params.position))
    }

    async fn rename(&self, params: RenameParams) -> Result<Option<WorkspaceEdit>> {
        let position = params.text_document_position;
        let workspace = self.synced_workspace(&position.text_document.uri).await;
        Ok(handlers::rename(
            &workspace,
            &position.text_document.uri,
            position.position,
            &params.new_name,
        ))
    }

    async fn prepare_call_hierarchy(
        &self,
        params: CallHierarchyPrepareParams,
    ) -> Result<Option<Vec<CallHierarchyItem>>> {
        let position = params.text_document_position_params;
        let workspace = self.synced_workspace(&position.text_document.uri).await;
        Ok(handlers::prepare_call_hierarchy(&workspace, &position.text_document.uri, position.position))
    }

    async fn incoming_calls(
        &self,
        params: CallHierarchyIncomingCallsParams,
    ) -> Result<Option<Vec<CallHierarchyIncomingCall>>> {
        let workspace = self.synced_workspace(&params.item.uri).await;
        Ok(handlers::incoming_calls(&workspace, &params.item))
    }

    async fn outgoing_calls(
        &self,
        params: CallHierarchyOutgoingCallsParams,
    ) -> Result<Option<Vec<CallHierarchyOutgoingCall>>> {
        let workspace = self.synced_workspace(&params.item.uri).await;
        Ok(handlers::outgoing_calls(&workspace, &params.item))
    }
}

pub async fn start_lsp() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}
