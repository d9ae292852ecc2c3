// reference_index.rs - Benchmarks for populate, reference queries and edit round trips
//
// Run with: cargo bench --features test-support --bench reference_index
// Compare baselines: cargo bench --features test-support --bench reference_index -- --baseline before

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tower_lsp::lsp_types::{Position, Range, TextDocumentContentChangeEvent, Url};

use bsl_ls::config::ServerConfig;
use bsl_ls::symbols::SourceSymbol;
use bsl_ls::test_utils::fixture_workspace::{create_fixture_workspace, method_name, module_name, FixtureConfig};
use bsl_ls::workspace::Workspace;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn module_uri(root: &std::path::Path, index: usize) -> Url {
    Url::from_file_path(root.join(format!("CommonModules/{}/Ext/Module.bsl", module_name(index)))).unwrap()
}

fn first_method(workspace: &Workspace, uri: &Url) -> SourceSymbol {
    let record = workspace.get_document(uri).unwrap();
    let tree = record.symbol_tree().unwrap();
    let id = tree.method_by_name(&method_name(0, 0)).unwrap().id;
    tree.source_symbol(id, uri, record.module_info()).unwrap()
}

fn configs() -> Vec<(&'static str, FixtureConfig)> {
    vec![("small_10", FixtureConfig::small()), ("medium_50", FixtureConfig::medium())]
}

// ---------------------------------------------------------------------------
// Benchmark: populate from disk
// ---------------------------------------------------------------------------

fn bench_populate(c: &mut Criterion) {
    let mut group = c.benchmark_group("reference_index_populate");
    group.sample_size(10);

    for (label, config) in configs() {
        let dir = create_fixture_workspace(&config);
        group.bench_with_input(BenchmarkId::new("populate_from_root", label), &dir, |b, dir| {
            b.iter(|| {
                let workspace = Workspace::new(Some(dir.path().to_path_buf()), ServerConfig::default());
                black_box(workspace.populate_from_root().unwrap())
            })
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: get_references_to
// ---------------------------------------------------------------------------

fn bench_references_to(c: &mut Criterion) {
    let mut group = c.benchmark_group("reference_index_references_to");
    group.sample_size(20);

    for (label, config) in configs() {
        let dir = create_fixture_workspace(&config);
        let workspace = Workspace::new(Some(dir.path().to_path_buf()), ServerConfig::default());
        workspace.populate_from_root().unwrap();
        let symbol = first_method(&workspace, &module_uri(dir.path(), 0));

        group.bench_with_input(
            BenchmarkId::new("get_references_to", label),
            &(&workspace, &symbol),
            |b, &(workspace, symbol)| b.iter(|| black_box(workspace.get_references_to(black_box(symbol)))),
        );
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: submit an edit and wait until it is indexed
// ---------------------------------------------------------------------------

fn bench_edit_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("reference_index_edit");
    group.sample_size(20);

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();

    for (label, config) in configs() {
        let dir = create_fixture_workspace(&config);
        let workspace = Workspace::new(Some(dir.path().to_path_buf()), ServerConfig::default());
        workspace.populate_from_root().unwrap();
        let uri = module_uri(dir.path(), 1);
        let text = std::fs::read_to_string(uri.to_file_path().unwrap()).unwrap();
        rt.block_on(async { workspace.open_document(&uri, &text, 1) });

        let mut version = 1;
        group.bench_function(BenchmarkId::new("submit_and_await", label), |b| {
            b.iter(|| {
                version += 1;
                let at = Position::new(0, 0);
                let change = TextDocumentContentChangeEvent {
                    range: Some(Range::new(at, at)),
                    range_length: None,
                    text: String::from("// правка\n"),
                };
                rt.block_on(async {
                    workspace.submit(&uri, version, vec![change]);
                    workspace.await_latest(&uri).await;
                })
            })
        });
        rt.block_on(async { workspace.shutdown() });
    }

    group.finish();
}

criterion_group!(benches, bench_populate, bench_references_to, bench_edit_round_trip);
criterion_main!(benches);
