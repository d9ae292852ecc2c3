//
// lib.rs
//
// Language server core for 1C:Enterprise and OneScript (BSL) projects:
// ordered edit application, document store and a cross-file reference index.
//
// The binary entry point lives in main.rs; every module is public so that
// benches/ and tests/ can drive a workspace directly.
//

pub mod backend;
pub mod change_sync;
pub mod config;
pub mod content_provider;
pub mod document;
pub mod document_store;
pub mod handlers;
pub mod metadata;
pub mod parser;
pub mod references;
pub mod symbols;
pub mod text_edit;
pub mod utf16;
pub mod workspace;
pub mod workspace_manager;

// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
