//! Lookup tables for operations, data formats and installed plugins.

use crate::{
    engine::Engine,
    error::EngineError,
    operations,
    protocol::ProtocolStep,
    task::{TaskContext, TaskError},
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

/// A named step that protocols can invoke.
pub trait Operation: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn execute(&self, step: &ProtocolStep, ctx: &mut TaskContext<'_>) -> Result<(), TaskError>;
}

#[derive(Default)]
pub struct OperationCatalog {
    operations: RwLock<BTreeMap<String, Arc<dyn Operation>>>,
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let ret = Self::new();
        for op in operations::builtin_operations() {
            ret.register(op);
        }
        ret
    }

    /// Returns `true` if an operation of the same name was replaced.
    pub fn register(&self, operation: Arc<dyn Operation>) -> bool {
        self.operations
            .write()
            .insert(operation.name().to_string(), operation)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.operations.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.operations.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.operations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.read().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFormat {
    pub name: String,
    pub extension: String,
    /// Integer code used by sessions older than format 3.
    #[serde(default)]
    pub legacy_code: Option<u32>,
}

impl DataFormat {
    pub fn new(name: &str, extension: &str) -> Self {
        Self {
            name: name.to_string(),
            extension: extension.to_string(),
            legacy_code: None,
        }
    }

    fn legacy(name: &str, extension: &str, code: u32) -> Self {
        Self {
            legacy_code: Some(code),
            ..Self::new(name, extension)
        }
    }
}

pub struct DataFormatCatalog {
    formats: RwLock<Vec<DataFormat>>,
}

impl Default for DataFormatCatalog {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl DataFormatCatalog {
    pub fn empty() -> Self {
        Self {
            formats: RwLock::new(Vec::new()),
        }
    }

    pub fn with_builtins() -> Self {
        Self {
            formats: RwLock::new(vec![
                DataFormat::legacy("Plain", "txt", 0),
                DataFormat::legacy("HTML", "html", 1),
                DataFormat::legacy("XML", "xml", 2),
                DataFormat::legacy("FASTA", "fasta", 3),
                DataFormat::legacy("GFF", "gff", 4),
            ]),
        }
    }

    pub fn register(&self, format: DataFormat) -> Result<(), EngineError> {
        let mut formats = self.formats.write();
        if formats.iter().any(|f| f.name.eq_ignore_ascii_case(&format.name)) {
            return Err(EngineError::InvalidInput(format!(
                "Data format '{}' is already registered",
                format.name
            )));
        }
        formats.push(format);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<DataFormat> {
        self.formats
            .read()
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn name_for_legacy_code(&self, code: u32) -> Option<String> {
        self.formats
            .read()
            .iter()
            .find(|f| f.legacy_code == Some(code))
            .map(|f| f.name.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.formats.read().iter().map(|f| f.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    /// Other plugins that must be installed first.
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub install_directory: Option<PathBuf>,
}

impl PluginMetadata {
    /// String view of a metadata key, as shown by `capabilities`.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "type" => Some(self.plugin_type.clone()),
            "requires" => Some(self.requires.join(",")),
            "install_directory" => self
                .install_directory
                .as_ref()
                .map(|p| p.display().to_string()),
            _ => None,
        }
    }
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::default()
    }

    /// Called once on registration. Plugins typically add operations or
    /// data formats to the engine here.
    fn initialize(&self, engine: &Engine) -> Result<(), EngineError>;

    fn shutdown(&self) {}
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<BTreeMap<String, Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.read().keys().cloned().collect()
    }

    pub fn metadata(&self, name: &str) -> Option<PluginMetadata> {
        self.plugins.read().get(name).map(|p| p.metadata())
    }

    /// Names from `required` that are not installed.
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let plugins = self.plugins.read();
        required
            .into_iter()
            .filter(|name| !plugins.contains_key(*name))
            .map(|name| name.to_string())
            .collect()
    }

    pub(crate) fn insert(&self, plugin: Arc<dyn Plugin>) -> Result<(), EngineError> {
        let mut plugins = self.plugins.write();
        let name = plugin.name().to_string();
        if plugins.contains_key(&name) {
            return Err(EngineError::InvalidInput(format!(
                "Plugin '{name}' is already installed"
            )));
        }
        plugins.insert(name, plugin);
        Ok(())
    }

    pub(crate) fn drain(&self) -> Vec<Arc<dyn Plugin>> {
        std::mem::take(&mut *self.plugins.write()).into_values().collect()
    }
}
