//! Repository configuration.
//!
//! ```toml
//! app_name = "server"
//!
//! [types.Car]
//! dims = ["oid", "xvel", "yvel", "xpos", "ypos"]
//! chain = ["Car", "Vehicle"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::schema::Schema;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Name this repository uses for itself when it talks to peers.
    pub app_name: String,

    #[serde(default)]
    pub types: BTreeMap<String, TypeConfig>,
}

/// One stored type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeConfig {
    #[serde(default)]
    pub dims: Vec<String>,

    /// Type chain, including the type itself. Empty means `[type]`.
    #[serde(default)]
    pub chain: Vec<String>,
}

impl RepositoryConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            types: BTreeMap::new(),
        }
    }

    pub fn with_type(mut self, type_name: impl Into<String>, config: TypeConfig) -> Self {
        self.types.insert(type_name.into(), config);
        self
    }

    /// Parses configuration from a TOML string, reporting the line of the first error.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            Error::Config(message)
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: could not read file: {e}", path.display())))?;
        Self::from_toml_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn schema(&self) -> Result<Schema> {
        if self.app_name.is_empty() {
            return Err(Error::Config("app_name must not be empty".into()));
        }
        let mut schema = Schema::new();
        for (type_name, config) in &self.types {
            if config.dims.iter().any(String::is_empty) {
                return Err(Error::Config(format!("{type_name} declares an empty dimension")));
            }
            let mut chain = config.chain.clone();
            if !chain.is_empty() && !chain.contains(type_name) {
                chain.push(type_name.clone());
            }
            schema = schema.with_type(type_name.clone(), config.dims.clone(), chain);
        }
        Ok(schema)
    }
}
