//
// config.rs
//
// Server configuration from LSP settings
//

use serde_json::Value;

use crate::metadata::ModuleKind;

/// Reference index and workspace configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Whether to index workspace folders after `initialized`
    pub index_workspace: bool,
    /// Module kinds a qualified call may target and still be indexed
    pub indexed_module_kinds: Vec<ModuleKind>,
    /// Bound on draining a document's pending edits when it closes
    pub close_timeout_ms: u64,
    /// Re-read a closed document from disk so the index matches saved state
    pub reload_closed_from_disk: bool,
    /// File extensions picked up when indexing a folder
    pub file_extensions: Vec<String>,
    /// Larger files are skipped when indexing a folder
    pub max_file_size_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            index_workspace: true,
            indexed_module_kinds: vec![ModuleKind::CommonModule, ModuleKind::ManagerModule, ModuleKind::Unknown],
            close_timeout_ms: 30_000,
            reload_closed_from_disk: true,
            file_extensions: vec!["bsl".to_string(), "os".to_string()],
            max_file_size_bytes: 5 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Whether `path` has one of the indexed extensions
    pub fn accepts_extension(&self, path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.file_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
    }
}

/// Build a configuration from the `referenceIndex` section of LSP settings
///
/// Unknown keys are ignored; values of the wrong type keep their defaults.
///
/// # Returns
/// `None` when the settings have no `referenceIndex` section
pub fn parse_server_config(settings: &Value) -> Option<ServerConfig> {
    let section = settings.get("referenceIndex")?;
    let mut config = ServerConfig::default();

    if let Some(v) = section.get("indexWorkspace").and_then(|v| v.as_bool()) {
        config.index_workspace = v;
    }
    if let Some(kinds) = section.get("indexedModuleKinds").and_then(|v| v.as_array()) {
        let parsed: Vec<ModuleKind> = kinds
            .iter()
            .filter_map(|kind| match serde_json::from_value::<ModuleKind>(kind.clone()) {
                Ok(kind) => Some(kind),
                Err(err) => {
                    log::warn!("Ignoring unknown module kind {kind}: {err}");
                    None
                }
            })
            .collect();
        config.indexed_module_kinds = parsed;
    }
    if let Some(v) = section.get("closeTimeoutMs").and_then(|v| v.as_u64()) {
        config.close_timeout_ms = v;
    }
    if let Some(v) = section.get("reloadClosedFromDisk").and_then(|v| v.as_bool()) {
        config.reload_closed_from_disk = v;
    }
    if let Some(extensions) = section.get("fileExtensions").and_then(|v| v.as_array()) {
        let parsed: Vec<String> = extensions
            .iter()
            .filter_map(|e| e.as_str())
            .map(|e| e.trim_start_matches('.').to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if !parsed.is_empty() {
            config.file_extensions = parsed;
        }
    }
    if let Some(v) = section.get("maxFileSizeBytes").and_then(|v| v.as_u64()) {
        config.max_file_size_bytes = v as usize;
    }

    log::info!("Reference index configuration loaded from LSP settings:");
    log::info!("  index_workspace: {}", config.index_workspace);
    log::info!("  indexed_module_kinds: {:?}", config.indexed_module_kinds);
    log::info!("  close_timeout_ms: {}", config.close_timeout_ms);
    log::info!("  reload_closed_from_disk: {}", config.reload_closed_from_disk);
    log::info!("  file_extensions: {:?}", config.file_extensions);
    log::info!("  max_file_size_bytes: {}", config.max_file_size_bytes);

    Some(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_section_is_none() {
        assert!(parse_server_config(&json!({})).is_none());
        assert!(parse_server_config(&json!({ "other": { "indexWorkspace": false } })).is_none());
    }

    #[test]
    fn test_empty_section_gives_defaults() {
        assert_eq!(parse_server_config(&json!({ "referenceIndex": {} })), Some(ServerConfig::default()));
    }

    #[test]
    fn test_all_keys() {
        let config = parse_server_config(&json!({
            "referenceIndex": {
                "indexWorkspace": false,
                "indexedModuleKinds": ["CommonModule", "ObjectModule"],
                "closeTimeoutMs": 500,
                "reloadClosedFromDisk": false,
                "fileExtensions": [".bsl"],
                "maxFileSizeBytes": 1024
            }
        }))
        .unwrap();
        assert!(!config.index_workspace);
        assert_eq!(config.indexed_module_kinds, vec![ModuleKind::CommonModule, ModuleKind::ObjectModule]);
        assert_eq!(config.close_timeout_ms, 500);
        assert!(!config.reload_closed_from_disk);
        assert_eq!(config.file_extensions, vec!["bsl"]);
        assert_eq!(config.max_file_size_bytes, 1024);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = parse_server_config(&json!({
            "referenceIndex": {
                "indexWorkspace": "yes",
                "closeTimeoutMs": -1,
                "indexedModuleKinds": ["CommonModule", "NoSuchKind", 3],
                "fileExtensions": []
            }
        }))
        .unwrap();
        let defaults = ServerConfig::default();
        assert_eq!(config.index_workspace, defaults.index_workspace);
        assert_eq!(config.close_timeout_ms, defaults.close_timeout_ms);
        assert_eq!(config.indexed_module_kinds, vec![ModuleKind::CommonModule]);
        assert_eq!(config.file_extensions, defaults.file_extensions);
    }

    #[test]
    fn test_accepts_extension_ignores_case() {
        let config = ServerConfig::default();
        assert!(config.accepts_extension(std::path::Path::new("/src/Module.BSL")));
        assert!(config.accepts_extension(std::path::Path::new("/lib/main.os")));
        assert!(!config.accepts_extension(std::path::Path::new("/src/Form.xml")));
    }
}
