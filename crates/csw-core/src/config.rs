//! Configuration types for harvester components.
//!
//! Defaults are hardcoded here; the CLI overrides them from flags and
//! environment variables, and named catalogs can be declared in a
//! `catalogs.toml` file:
//!
//! ```toml
//! [[catalogs]]
//! name = "geopicardie"
//! url = "https://www.geopicardie.fr/geonetwork/srv/fre/csw"
//! schema = "iso"
//! compat_options = ["define-namespace"]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;
use crate::models::{CompatOptionSet, HarvestSchema};

/// File name looked up in the user configuration directory.
pub const CONFIG_FILE_NAME: &str = "catalogs.toml";

/// HTTP client configuration for catalog requests.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub gzip: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("csw-harvester/{}", env!("CARGO_PKG_VERSION")),
            gzip: true,
        }
    }
}

/// Harvesting session configuration.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub schema: HarvestSchema,
    /// Maximum number of page requests in flight.
    pub concurrency: usize,
    /// Number of records requested per page.
    pub step: u64,
    /// Inactivity window after which the session aborts.
    pub activity_timeout: Duration,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            schema: HarvestSchema::Dc,
            concurrency: 2,
            step: 20,
            activity_timeout: Duration::from_secs(20),
        }
    }
}

impl HarvestConfig {
    /// Checks the numeric bounds of the configuration.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 {
            return Err(AppError::ConfigError(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.step == 0 {
            return Err(AppError::ConfigError("step must be at least 1".to_string()));
        }
        if self.activity_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "activity timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Upper bound of records buffered by a session.
    pub fn buffer_capacity(&self) -> usize {
        self.step as usize * self.concurrency
    }
}

// =============================================================================
// Catalogs file
// =============================================================================

fn default_enabled() -> bool {
    true
}

/// A named CSW endpoint declared in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub schema: Option<HarvestSchema>,
    /// Workarounds known in advance for this server.
    #[serde(default)]
    pub compat_options: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl CatalogEntry {
    /// Parses the preset compatibility options.
    pub fn compat_option_set(&self) -> Result<CompatOptionSet, AppError> {
        CompatOptionSet::from_names(&self.compat_options)
    }
}

/// Contents of `catalogs.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogsConfig {
    #[serde(default)]
    pub catalogs: Vec<CatalogEntry>,
}

impl CatalogsConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, AppError> {
        let config: CatalogsConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        let mut names = HashSet::new();
        for entry in &self.catalogs {
            if entry.url.trim().is_empty() {
                return Err(AppError::ConfigError(format!(
                    "catalog '{}' has an empty url",
                    entry.name
                )));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(AppError::ConfigError(format!(
                    "duplicate catalog name '{}'",
                    entry.name
                )));
            }
            entry.compat_option_set()?;
        }
        Ok(())
    }

    /// Catalogs that should be harvested by default.
    pub fn enabled(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.catalogs.iter().filter(|entry| entry.enabled)
    }

    pub fn find(&self, name: &str) -> Option<&CatalogEntry> {
        self.catalogs.iter().find(|entry| entry.name == name)
    }
}

/// Default location of the catalogs file (`<config dir>/csw-harvester/catalogs.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("csw-harvester").join(CONFIG_FILE_NAME))
}

/// Loads the catalogs file.
///
/// An explicit `path` must exist. Without one, the default location is tried
/// and a missing file yields `Ok(None)`.
pub fn load_catalogs_config(path: Option<&Path>) -> Result<Option<CatalogsConfig>, AppError> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => return Ok(None),
        },
    };

    if !explicit && !path.exists() {
        tracing::debug!(path = %path.display(), "No catalogs file found");
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)?;
    CatalogsConfig::from_toml(&content).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CompatOption;
    use std::io::Write;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.gzip);
        assert!(config.user_agent.starts_with("csw-harvester/"));
    }

    #[test]
    fn test_harvest_config_defaults() {
        let config = HarvestConfig::default();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.step, 20);
        assert_eq!(config.activity_timeout, Duration::from_secs(20));
        assert_eq!(config.buffer_capacity(), 40);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_harvest_config_rejects_zero_values() {
        let config = HarvestConfig {
            concurrency: 0,
            ..HarvestConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));

        let config = HarvestConfig {
            step: 0,
            ..HarvestConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_catalogs_from_toml() {
        let config = CatalogsConfig::from_toml(
            r#"
            [[catalogs]]
            name = "geopicardie"
            url = "https://www.geopicardie.fr/geonetwork/srv/fre/csw"
            schema = "iso"
            compat_options = ["define-namespace"]

            [[catalogs]]
            name = "sandbox"
            url = "http://localhost:8080/csw"
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.catalogs.len(), 2);
        assert_eq!(config.enabled().count(), 1);
        let entry = config.find("geopicardie").unwrap();
        assert_eq!(entry.schema, Some(HarvestSchema::Iso));
        assert!(entry
            .compat_option_set()
            .unwrap()
            .contains(CompatOption::DefineNamespace));
    }

    #[test]
    fn test_catalogs_reject_unknown_compat_option() {
        let result = CatalogsConfig::from_toml(
            r#"
            [[catalogs]]
            name = "broken"
            url = "http://localhost/csw"
            compat_options = ["make-it-work"]
            "#,
        );
        assert!(matches!(result, Err(AppError::UnknownCompatOption(_))));
    }

    #[test]
    fn test_catalogs_reject_duplicate_names() {
        let result = CatalogsConfig::from_toml(
            r#"
            [[catalogs]]
            name = "a"
            url = "http://one/csw"

            [[catalogs]]
            name = "a"
            url = "http://two/csw"
            "#,
        );
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_load_catalogs_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[catalogs]]\nname = \"local\"\nurl = \"http://localhost/csw\""
        )
        .unwrap();

        let config = load_catalogs_config(Some(file.path())).unwrap().unwrap();
        assert_eq!(config.catalogs[0].name, "local");
        assert!(config.catalogs[0].enabled);
    }

    #[test]
    fn test_load_catalogs_config_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_catalogs_config(Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(AppError::IoError(_))));
    }
}
