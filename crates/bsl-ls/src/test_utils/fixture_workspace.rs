//! Deterministic fixture project generator for benchmarks and tests.
//!
//! Generates a Designer-layout configuration export with controlled
//! characteristics: common module count, exported functions per module,
//! cross-module calls per function, catalog manager modules calling into
//! the common modules, and extra statements per function.
//!
//! Output is deterministic so benchmarks are reproducible.

use std::fmt::Write;
use std::path::Path;
use tempfile::TempDir;

/// Configuration for generating a fixture project.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub module_count: usize,
    pub methods_per_module: usize,
    pub calls_per_method: usize,
    pub catalog_count: usize,
    pub extra_lines_per_method: usize,
}

impl FixtureConfig {
    /// 10 common modules, 5 functions each.
    pub fn small() -> Self {
        Self {
            module_count: 10,
            methods_per_module: 5,
            calls_per_method: 2,
            catalog_count: 5,
            extra_lines_per_method: 3,
        }
    }

    /// 50 common modules, 10 functions each.
    pub fn medium() -> Self {
        Self {
            module_count: 50,
            methods_per_module: 10,
            calls_per_method: 3,
            catalog_count: 25,
            extra_lines_per_method: 10,
        }
    }

    /// 200 common modules, 20 functions each.
    pub fn large() -> Self {
        Self {
            module_count: 200,
            methods_per_module: 20,
            calls_per_method: 4,
            catalog_count: 100,
            extra_lines_per_method: 20,
        }
    }

    /// Number of recorded calls of `Метод{module}_{method}`
    ///
    /// Each function makes `calls_per_method` calls, and call number `c`
    /// of exactly one function targets any given method. Catalog `k`
    /// additionally calls the first function of module `k % module_count`.
    pub fn expected_calls_to(&self, module: usize, method: usize) -> usize {
        let from_catalogs = if method == 0 {
            (0..self.catalog_count).filter(|k| k % self.module_count == module).count()
        } else {
            0
        };
        self.calls_per_method + from_catalogs
    }
}

pub fn module_name(index: usize) -> String {
    format!("Модуль{}", index)
}

pub fn method_name(module: usize, method: usize) -> String {
    format!("Метод{}_{}", module, method)
}

fn generate_common_module(index: usize, config: &FixtureConfig) -> String {
    let mut content = String::new();
    let n = config.module_count;
    let m = config.methods_per_module;

    writeln!(content, "#Область ПрограммныйИнтерфейс").unwrap();
    content.push('\n');
    for j in 0..m {
        writeln!(content, "Функция {}(Параметр) Экспорт", method_name(index, j)).unwrap();
        writeln!(content, "\tРезультат = Параметр + {};", j + 1).unwrap();
        for c in 0..config.calls_per_method {
            let target_module = (index + 1 + c) % n;
            let target_method = (j + c) % m;
            writeln!(
                content,
                "\tРезультат = Результат + {}.{}(Результат);",
                module_name(target_module),
                method_name(target_module, target_method)
            )
            .unwrap();
        }
        for l in 0..config.extra_lines_per_method {
            writeln!(content, "\tЗначение{} = Результат * {};", l, l + 1).unwrap();
        }
        writeln!(content, "\tВозврат Результат;").unwrap();
        writeln!(content, "КонецФункции").unwrap();
        content.push('\n');
    }
    writeln!(content, "#КонецОбласти").unwrap();
    content
}

fn generate_catalog_manager(index: usize, config: &FixtureConfig) -> String {
    let target = index % config.module_count;
    let mut content = String::new();
    writeln!(content, "Процедура Заполнить() Экспорт").unwrap();
    writeln!(content, "\tИтог = {}.{}(1);", module_name(target), method_name(target, 0)).unwrap();
    writeln!(content, "КонецПроцедуры").unwrap();
    content
}

/// Relative paths and contents of every generated module.
pub fn fixture_files(config: &FixtureConfig) -> Vec<(String, String)> {
    assert!(config.module_count > 0 && config.methods_per_module > 0);
    let modules = (0..config.module_count).map(|i| {
        (
            format!("CommonModules/{}/Ext/Module.bsl", module_name(i)),
            generate_common_module(i, config),
        )
    });
    let catalogs = (0..config.catalog_count).map(|k| {
        (
            format!("Catalogs/Справочник{}/Ext/ManagerModule.bsl", k),
            generate_catalog_manager(k, config),
        )
    });
    modules.chain(catalogs).collect()
}

/// Create a temporary fixture project from the given configuration.
///
/// The directory is cleaned up when the `TempDir` is dropped.
pub fn create_fixture_workspace(config: &FixtureConfig) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory for fixture workspace");
    write_fixture_workspace(temp_dir.path(), config);
    temp_dir
}

/// Write fixture files into an existing directory.
pub fn write_fixture_workspace(dir: &Path, config: &FixtureConfig) {
    for (relative, content) in fixture_files(config) {
        let path = dir.join(&relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .unwrap_or_else(|e| panic!("Failed to create {}: {}", parent.display(), e));
        }
        std::fs::write(&path, &content).unwrap_or_else(|e| panic!("Failed to write fixture file {}: {}", relative, e));
    }
}
