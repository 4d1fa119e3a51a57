//! User settings
//!
//! Stored as JSON. Every field has a default, so a partial file (or no file
//! at all) yields a usable configuration.

use crate::codepage::Codepage;
use crate::error::ConfigError;
use crate::find::FindOptions;
use crate::query::DEFAULT_TABLE_NAME;
use crate::view::DEFAULT_ROWS_PER_PAGE;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Rows shown per page
    pub rows_per_page: usize,

    /// Copy the file aside before saving over it
    pub backup_on_save: bool,

    /// Copy the file aside before converting its encoding
    pub backup_on_convert: bool,

    /// Name queries use to refer to the open table
    pub query_table_name: String,

    /// Defaults for the find/replace dialog
    pub find: FindOptions,

    pub source_codepage: Codepage,
    pub target_codepage: Codepage,

    /// Code page for new DBF files and unmarked ones with plain ASCII text
    pub dbf_codepage: Codepage,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rows_per_page: DEFAULT_ROWS_PER_PAGE,
            backup_on_save: true,
            backup_on_convert: true,
            query_table_name: DEFAULT_TABLE_NAME.to_string(),
            find: FindOptions::default(),
            source_codepage: Codepage::Cp1252,
            target_codepage: Codepage::Cp437,
            dbf_codepage: Codepage::Cp1252,
        }
    }
}

impl Settings {
    /// Parses settings from JSON text
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads `path`, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rows_per_page == 0 {
            return Err(ConfigError::Invalid {
                key: "rows_per_page".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let name = self.query_table_name.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::Invalid {
                key: "query_table_name".to_string(),
                reason: format!("'{}' is not a valid identifier", self.query_table_name),
            });
        }
        Ok(())
    }
}
