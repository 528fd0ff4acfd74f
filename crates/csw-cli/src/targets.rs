//! Resolution of what a harvest command should harvest.

use csw_core::{AppError, CatalogEntry, CatalogsConfig, CompatOptionSet, HarvestSchema};

use crate::config::HarvestArgs;

/// One CSW service to harvest.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestTarget {
    pub name: String,
    pub url: String,
    pub schema: HarvestSchema,
    pub compat_options: CompatOptionSet,
}

impl HarvestTarget {
    fn from_entry(entry: &CatalogEntry, args: &HarvestArgs) -> Result<Self, AppError> {
        let mut compat_options = entry.compat_option_set()?;
        for option in args.compat_options()?.iter() {
            compat_options.insert(option);
        }
        Ok(Self {
            name: entry.name.clone(),
            url: entry.url.clone(),
            schema: args.schema.or(entry.schema).unwrap_or_default(),
            compat_options,
        })
    }
}

/// Targets of a harvest command: the URL given on the command line, the
/// named catalog, or every enabled catalog of the configuration file.
///
/// Command-line schema and compatibility options take precedence over the
/// configuration file.
pub fn resolve_targets(
    args: &HarvestArgs,
    catalogs: Option<&CatalogsConfig>,
) -> Result<Vec<HarvestTarget>, AppError> {
    if let Some(url) = &args.url {
        return Ok(vec![HarvestTarget {
            name: url.clone(),
            url: url.clone(),
            schema: args.schema.unwrap_or_default(),
            compat_options: args.compat_options()?,
        }]);
    }

    let catalogs = catalogs.ok_or_else(|| {
        AppError::ConfigError(
            "no URL given and no catalogs.toml found; pass a URL or --config".to_string(),
        )
    })?;

    if let Some(name) = &args.catalog {
        let entry = catalogs
            .find(name)
            .ok_or_else(|| AppError::ConfigError(format!("unknown catalog '{}'", name)))?;
        return Ok(vec![HarvestTarget::from_entry(entry, args)?]);
    }

    let targets = catalogs
        .enabled()
        .map(|entry| HarvestTarget::from_entry(entry, args))
        .collect::<Result<Vec<_>, _>>()?;
    if targets.is_empty() {
        return Err(AppError::ConfigError(
            "no enabled catalogs in configuration".to_string(),
        ));
    }
    Ok(targets)
}
