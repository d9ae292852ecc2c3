//
// test_utils/mod.rs
//
// Helpers shared by unit tests, integration tests and benches
//

pub mod fixture_workspace;
