//
// metadata.rs
//
// Project metadata: which configuration object and module kind a file backs
//

use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKind {
    CommonModule,
    ManagerModule,
    ObjectModule,
    RecordSetModule,
    ValueManagerModule,
    CommandModule,
    FormModule,
    SessionModule,
    ManagedApplicationModule,
    OrdinaryApplicationModule,
    ExternalConnectionModule,
    /// OneScript sources and files outside a known layout
    Unknown,
}

impl ModuleKind {
    /// Module kind from a module file stem (`ObjectModule.bsl` etc.)
    fn from_file_stem(stem: &str) -> Option<ModuleKind> {
        let kind = match stem {
            "ManagerModule" => ModuleKind::ManagerModule,
            "ObjectModule" => ModuleKind::ObjectModule,
            "RecordSetModule" => ModuleKind::RecordSetModule,
            "ValueManagerModule" => ModuleKind::ValueManagerModule,
            "CommandModule" => ModuleKind::CommandModule,
            "SessionModule" => ModuleKind::SessionModule,
            "ManagedApplicationModule" => ModuleKind::ManagedApplicationModule,
            "OrdinaryApplicationModule" => ModuleKind::OrdinaryApplicationModule,
            "ExternalConnectionModule" => ModuleKind::ExternalConnectionModule,
            _ => return None,
        };
        Some(kind)
    }
}

/// Object reference and module kind backing one document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleInfo {
    /// `CommonModule.Name`, `Catalog.Name.Form.Item`, `Configuration`, or
    /// the document URI for files outside a configuration
    pub mdo_ref: String,
    pub kind: ModuleKind,
}

impl ModuleInfo {
    fn unknown(uri: &Url) -> Self {
        Self {
            mdo_ref: uri.to_string(),
            kind: ModuleKind::Unknown,
        }
    }
}

/// A project object named by a qualifier in code, with the module kinds a
/// call through that qualifier can land in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub mdo_ref: String,
    pub kinds: Vec<ModuleKind>,
}

/// Resolves documents and code qualifiers to project objects
pub trait ProjectMetadata: Send + Sync {
    fn module_info(&self, uri: &Url) -> ModuleInfo;

    /// Record a document so qualifiers can resolve to it
    fn register(&self, uri: &Url);

    fn unregister(&self, uri: &Url);

    /// Whether registering `uri` lets qualifiers in other documents resolve
    /// to it
    fn is_qualifier_target(&self, uri: &Url) -> bool;

    /// Resolve the leading segments of a qualified access chain
    ///
    /// # Returns
    /// The number of segments consumed and the object they name, e.g.
    /// `["Справочники", "Товары", ...]` consumes 2 and names the manager of
    /// `Catalog.Товары`.
    fn resolve_qualifier(&self, segments: &[&str]) -> Option<(usize, ObjectRef)>;

    /// URI of the OneScript class module registered under `name`
    fn class_module(&self, name: &str) -> Option<Url>;
}

/// Folder name on disk, singular object type, and the collection names
/// code uses to reach managers
struct Collection {
    folder: &'static str,
    singular: &'static str,
    code_names: &'static [&'static str],
}

const COLLECTIONS: &[Collection] = &[
    Collection { folder: "Catalogs", singular: "Catalog", code_names: &["Справочники", "Catalogs"] },
    Collection { folder: "Documents", singular: "Document", code_names: &["Документы", "Documents"] },
    Collection { folder: "Enums", singular: "Enum", code_names: &["Перечисления", "Enums"] },
    Collection { folder: "Reports", singular: "Report", code_names: &["Отчеты", "Reports"] },
    Collection { folder: "DataProcessors", singular: "DataProcessor", code_names: &["Обработки", "DataProcessors"] },
    Collection {
        folder: "InformationRegisters",
        singular: "InformationRegister",
        code_names: &["РегистрыСведений", "InformationRegisters"],
    },
    Collection {
        folder: "AccumulationRegisters",
        singular: "AccumulationRegister",
        code_names: &["РегистрыНакопления", "AccumulationRegisters"],
    },
    Collection {
        folder: "AccountingRegisters",
        singular: "AccountingRegister",
        code_names: &["РегистрыБухгалтерии", "AccountingRegisters"],
    },
    Collection {
        folder: "CalculationRegisters",
        singular: "CalculationRegister",
        code_names: &["РегистрыРасчета", "CalculationRegisters"],
    },
    Collection {
        folder: "ChartsOfCharacteristicTypes",
        singular: "ChartOfCharacteristicTypes",
        code_names: &["ПланыВидовХарактеристик", "ChartsOfCharacteristicTypes"],
    },
    Collection {
        folder: "ChartsOfAccounts",
        singular: "ChartOfAccounts",
        code_names: &["ПланыСчетов", "ChartsOfAccounts"],
    },
    Collection {
        folder: "ChartsOfCalculationTypes",
        singular: "ChartOfCalculationTypes",
        code_names: &["ПланыВидовРасчета", "ChartsOfCalculationTypes"],
    },
    Collection {
        folder: "BusinessProcesses",
        singular: "BusinessProcess",
        code_names: &["БизнесПроцессы", "BusinessProcesses"],
    },
    Collection { folder: "Tasks", singular: "Task", code_names: &["Задачи", "Tasks"] },
    Collection { folder: "ExchangePlans", singular: "ExchangePlan", code_names: &["ПланыОбмена", "ExchangePlans"] },
    Collection { folder: "Constants", singular: "Constant", code_names: &["Константы", "Constants"] },
    Collection {
        folder: "DocumentJournals",
        singular: "DocumentJournal",
        code_names: &["ЖурналыДокументов", "DocumentJournals"],
    },
    Collection {
        folder: "SettingsStorages",
        singular: "SettingsStorage",
        code_names: &["ХранилищаНастроек", "SettingsStorages"],
    },
];

fn collection_by_folder(folder: &str) -> Option<&'static Collection> {
    COLLECTIONS.iter().find(|c| c.folder == folder)
}

fn collection_by_code_name(name: &str) -> Option<&'static Collection> {
    let lower = name.to_lowercase();
    COLLECTIONS
        .iter()
        .find(|c| c.code_names.iter().any(|n| n.to_lowercase() == lower))
}

const CLASS_FOLDERS: &[&str] = &["Classes", "Классы"];
const LIBRARY_MODULE_FOLDERS: &[&str] = &["Modules", "Модули"];

/// Path components of a `file:` URI, decoded
fn path_components(uri: &Url) -> Option<Vec<String>> {
    let path = uri.to_file_path().ok()?;
    Some(
        path.components()
            .filter_map(|c| c.as_os_str().to_str().map(str::to_string))
            .collect(),
    )
}

pub(crate) fn is_onescript(uri: &Url) -> bool {
    Path::new(uri.path())
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("os"))
}

fn file_stem(uri: &Url) -> Option<String> {
    let path = uri.to_file_path().ok()?;
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

/// Object reference of a `.bsl` module from its directory chain
///
/// Handles Designer (`Catalogs/X/Ext/ObjectModule.bsl`,
/// `Catalogs/X/Forms/F/Ext/Form/Module.bsl`) and EDT
/// (`Catalogs/X/ObjectModule.bsl`, `Catalogs/X/Forms/F/Module.bsl`) layouts.
fn classify_bsl(components: &[String]) -> Option<ModuleInfo> {
    let (file, dirs) = components.split_last()?;
    let stem = file.strip_suffix(".bsl")?;
    let mut dirs: Vec<&str> = dirs.iter().map(String::as_str).collect();

    let designer_form = stem == "Module" && dirs.last() == Some(&"Form");
    if designer_form {
        dirs.pop();
    }
    if dirs.last() == Some(&"Ext") {
        dirs.pop();
    }

    let at = |back: usize| dirs.len().checked_sub(back).and_then(|i| dirs.get(i)).copied();

    if stem == "Module" {
        let name = at(1)?;
        return match at(2)? {
            "CommonModules" => Some(ModuleInfo {
                mdo_ref: format!("CommonModule.{name}"),
                kind: ModuleKind::CommonModule,
            }),
            "CommonForms" => Some(ModuleInfo {
                mdo_ref: format!("CommonForm.{name}"),
                kind: ModuleKind::FormModule,
            }),
            "Forms" => {
                let owner = collection_by_folder(at(4)?)?;
                Some(ModuleInfo {
                    mdo_ref: format!("{}.{}.Form.{name}", owner.singular, at(3)?),
                    kind: ModuleKind::FormModule,
                })
            }
            _ => None,
        };
    }

    let kind = ModuleKind::from_file_stem(stem)?;
    match kind {
        ModuleKind::SessionModule
        | ModuleKind::ManagedApplicationModule
        | ModuleKind::OrdinaryApplicationModule
        | ModuleKind::ExternalConnectionModule => Some(ModuleInfo {
            mdo_ref: "Configuration".to_string(),
            kind,
        }),
        ModuleKind::CommandModule => {
            let name = at(1)?;
            match at(2)? {
                "CommonCommands" => Some(ModuleInfo {
                    mdo_ref: format!("CommonCommand.{name}"),
                    kind,
                }),
                "Commands" => {
                    let owner = collection_by_folder(at(4)?)?;
                    Some(ModuleInfo {
                        mdo_ref: format!("{}.{}.Command.{name}", owner.singular, at(3)?),
                        kind,
                    })
                }
                _ => None,
            }
        }
        _ => {
            let owner = collection_by_folder(at(2)?)?;
            Some(ModuleInfo {
                mdo_ref: format!("{}.{}", owner.singular, at(1)?),
                kind,
            })
        }
    }
}

/// Metadata derived from file paths of a configuration export
///
/// Common modules, manager modules, OneScript library modules and classes
/// become resolvable once their documents are registered.
#[derive(Debug, Default)]
pub struct ConfigurationLayout {
    /// Lowercased name -> mdo_ref
    common_modules: DashMap<String, String>,
    /// Lowercased mdo_ref -> mdo_ref of objects with a manager module
    managers: DashMap<String, String>,
    /// Lowercased stem -> module URI
    library_modules: DashMap<String, Url>,
    /// Lowercased stem -> class URI
    classes: DashMap<String, Url>,
}

impl ConfigurationLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parent folder name of a OneScript file
    fn onescript_folder(uri: &Url) -> Option<String> {
        let components = path_components(uri)?;
        let len = components.len();
        (len >= 2).then(|| components[len - 2].clone())
    }
}

impl ProjectMetadata for ConfigurationLayout {
    fn module_info(&self, uri: &Url) -> ModuleInfo {
        if is_onescript(uri) {
            return ModuleInfo::unknown(uri);
        }
        path_components(uri)
            .and_then(|components| classify_bsl(&components))
            .unwrap_or_else(|| ModuleInfo::unknown(uri))
    }

    fn register(&self, uri: &Url) {
        if is_onescript(uri) {
            let (Some(folder), Some(stem)) = (Self::onescript_folder(uri), file_stem(uri)) else {
                return;
            };
            if CLASS_FOLDERS.contains(&folder.as_str()) {
                self.classes.insert(stem.to_lowercase(), uri.clone());
            } else if LIBRARY_MODULE_FOLDERS.contains(&folder.as_str()) {
                self.library_modules.insert(stem.to_lowercase(), uri.clone());
            }
            return;
        }

        let info = self.module_info(uri);
        match info.kind {
            ModuleKind::CommonModule => {
                if let Some(name) = info.mdo_ref.strip_prefix("CommonModule.") {
                    self.common_modules.insert(name.to_lowercase(), info.mdo_ref.clone());
                }
            }
            ModuleKind::ManagerModule => {
                self.managers.insert(info.mdo_ref.to_lowercase(), info.mdo_ref.clone());
            }
            _ => {}
        }
    }

    fn unregister(&self, uri: &Url) {
        if is_onescript(uri) {
            if let Some(stem) = file_stem(uri) {
                let key = stem.to_lowercase();
                self.classes.remove_if(&key, |_, registered| registered == uri);
                self.library_modules.remove_if(&key, |_, registered| registered == uri);
            }
            return;
        }

        let info = self.module_info(uri);
        match info.kind {
            ModuleKind::CommonModule => {
                if let Some(name) = info.mdo_ref.strip_prefix("CommonModule.") {
                    self.common_modules.remove(&name.to_lowercase());
                }
            }
            ModuleKind::ManagerModule => {
                self.managers.remove(&info.mdo_ref.to_lowercase());
            }
            _ => {}
        }
    }

    fn is_qualifier_target(&self, uri: &Url) -> bool {
        if is_onescript(uri) {
            return Self::onescript_folder(uri)
                .is_some_and(|folder| LIBRARY_MODULE_FOLDERS.contains(&folder.as_str()));
        }
        matches!(self.module_info(uri).kind, ModuleKind::CommonModule | ModuleKind::ManagerModule)
    }

    fn resolve_qualifier(&self, segments: &[&str]) -> Option<(usize, ObjectRef)> {
        let first = segments.first()?;

        if let (Some(collection), Some(name)) = (collection_by_code_name(first), segments.get(1)) {
            // Objects without a manager module have nothing to call into
            let key = format!("{}.{}", collection.singular, name).to_lowercase();
            let mdo_ref = self.managers.get(&key)?.value().clone();
            return Some((
                2,
                ObjectRef {
                    mdo_ref,
                    kinds: vec![ModuleKind::ManagerModule],
                },
            ));
        }

        let key = first.to_lowercase();
        if let Some(mdo_ref) = self.common_modules.get(&key) {
            return Some((
                1,
                ObjectRef {
                    mdo_ref: mdo_ref.value().clone(),
                    kinds: vec![ModuleKind::CommonModule],
                },
            ));
        }
        if let Some(uri) = self.library_modules.get(&key) {
            return Some((
                1,
                ObjectRef {
                    mdo_ref: uri.value().to_string(),
                    kinds: vec![ModuleKind::Unknown],
                },
            ));
        }
        None
    }

    fn class_module(&self, name: &str) -> Option<Url> {
        self.classes.get(&name.to_lowercase()).map(|uri| uri.value().clone())
    }
}
