//
// workspace_manager.rs
//
// One workspace per workspace folder, plus a fallback for loose files
//

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tower_lsp::lsp_types::Url;

use crate::config::ServerConfig;
use crate::workspace::Workspace;

pub struct WorkspaceManager {
    config: RwLock<ServerConfig>,
    workspaces: RwLock<Vec<Arc<Workspace>>>,
    fallback: Arc<Workspace>,
}

impl WorkspaceManager {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            fallback: Arc::new(Workspace::new(None, config.clone())),
            config: RwLock::new(config),
            workspaces: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> ServerConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the configuration of the manager and every workspace
    pub fn set_config(&self, config: ServerConfig) {
        for workspace in self.all() {
            workspace.set_config(config.clone());
        }
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Workspace rooted at `root`, created if needed
    pub fn add_workspace(&self, root: PathBuf) -> Arc<Workspace> {
        let mut workspaces = self.workspaces.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = workspaces.iter().find(|w| w.root() == Some(root.as_path())) {
            return Arc::clone(existing);
        }
        log::info!("Adding workspace folder: {}", root.display());
        let workspace = Arc::new(Workspace::new(Some(root), self.config()));
        workspaces.push(Arc::clone(&workspace));
        workspace
    }

    /// Drop the workspace rooted at `root` and everything it holds
    pub fn remove_workspace(&self, root: &Path) -> bool {
        let removed = {
            let mut workspaces = self.workspaces.write().unwrap_or_else(PoisonError::into_inner);
            let position = workspaces.iter().position(|w| w.root() == Some(root));
            position.map(|i| workspaces.remove(i))
        };
        match removed {
            Some(workspace) => {
                log::info!("Removing workspace folder: {}", root.display());
                workspace.clear();
                true
            }
            None => false,
        }
    }

    /// The workspace with the longest root containing `uri`, else the
    /// fallback
    pub fn workspace_for(&self, uri: &Url) -> Arc<Workspace> {
        let Ok(path) = uri.to_file_path() else {
            return Arc::clone(&self.fallback);
        };
        let workspaces = self.workspaces.read().unwrap_or_else(PoisonError::into_inner);
        workspaces
            .iter()
            .filter_map(|w| {
                let root = w.root()?;
                path.starts_with(root).then_some((root.components().count(), w))
            })
            .max_by_key(|(depth, _)| *depth)
            .map(|(_, w)| Arc::clone(w))
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Folder workspaces followed by the fallback
    pub fn all(&self) -> Vec<Arc<Workspace>> {
        let workspaces = self.workspaces.read().unwrap_or_else(PoisonError::into_inner);
        workspaces
            .iter()
            .cloned()
            .chain(std::iter::once(Arc::clone(&self.fallback)))
            .collect()
    }

    pub fn fallback(&self) -> &Arc<Workspace> {
        &self.fallback
    }

    /// Drop every folder workspace and empty the fallback
    pub fn clear(&self) {
        let removed: Vec<Arc<Workspace>> =
            std::mem::take(&mut *self.workspaces.write().unwrap_or_else(PoisonError::into_inner));
        for workspace in removed {
            workspace.clear();
        }
        self.fallback.clear();
    }

    /// Stop all edit queues
    pub fn shutdown(&self) {
        for workspace in self.all() {
            workspace.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> Url {
        Url::from_file_path(path).unwrap()
    }

    #[test]
    fn test_longest_root_wins() {
        let manager = WorkspaceManager::new(ServerConfig::default());
        let outer = manager.add_workspace(PathBuf::from("/projects/erp"));
        let inner = manager.add_workspace(PathBuf::from("/projects/erp/extensions/sales"));

        let found = manager.workspace_for(&file("/projects/erp/extensions/sales/CommonModules/Продажи/Ext/Module.bsl"));
        assert!(Arc::ptr_eq(&found, &inner));
        let found = manager.workspace_for(&file("/projects/erp/CommonModules/Общий/Ext/Module.bsl"));
        assert!(Arc::ptr_eq(&found, &outer));
    }

    #[test]
    fn test_outside_every_root_uses_fallback() {
        let manager = WorkspaceManager::new(ServerConfig::default());
        manager.add_workspace(PathBuf::from("/projects/erp"));
        // Component-wise prefix, not string prefix
        let found = manager.workspace_for(&file("/projects/erp-old/Module.bsl"));
        assert!(Arc::ptr_eq(&found, manager.fallback()));
        let untitled = Url::parse("untitled:Untitled-1").unwrap();
        assert!(Arc::ptr_eq(&manager.workspace_for(&untitled), manager.fallback()));
    }

    #[test]
    fn test_add_is_idempotent_and_remove_clears() {
        let manager = WorkspaceManager::new(ServerConfig::default());
        let first = manager.add_workspace(PathBuf::from("/projects/erp"));
        let second = manager.add_workspace(PathBuf::from("/projects/erp"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.all().len(), 2);

        first.add_document(&file("/projects/erp/CommonModules/Общий/Ext/Module.bsl"), "А = 1;");
        assert!(manager.remove_workspace(Path::new("/projects/erp")));
        assert!(first.store().is_empty());
        assert!(!manager.remove_workspace(Path::new("/projects/erp")));
        assert_eq!(manager.all().len(), 1);
    }

    #[test]
    fn test_config_reaches_every_workspace() {
        let manager = WorkspaceManager::new(ServerConfig::default());
        let workspace = manager.add_workspace(PathBuf::from("/projects/erp"));
        let mut config = ServerConfig::default();
        config.close_timeout_ms = 10;
        manager.set_config(config.clone());
        assert_eq!(workspace.config(), config);
        assert_eq!(manager.fallback().config(), config);
        assert_eq!(manager.add_workspace(PathBuf::from("/projects/hr")).config(), config);
    }
}
