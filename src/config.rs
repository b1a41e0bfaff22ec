use crate::{
    cohort::CohortDefinitions,
    load::ColumnNames,
    los::LosWindow,
    timestamp::{DateOrder, IdentifierLayout},
    RangeSet, Result,
};
use qu::ick_use::*;
use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::Path};

const BUILTIN: &str = include_str!("../data/config.toml");

/// Everything about an analysis that is data rather than code.
#[derive(Debug, Clone)]
pub struct Config {
    pub columns: ColumnNames,
    pub identifier: IdentifierLayout,
    pub date_order: DateOrder,
    pub cohorts: CohortDefinitions,
    /// Named sets of age groups.
    pub age_groups: BTreeMap<String, RangeSet<u32>>,
    /// Name of the age group set stored on each admission.
    pub record_age_groups: String,
    pub los_categories: RangeSet<f64>,
    pub los_windows: BTreeMap<String, LosWindow>,
}

/// A config file. Sections left out keep their built-in values.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigRaw {
    columns: Option<ColumnNames>,
    identifier: Option<IdentifierLayout>,
    date_order: Option<DateOrder>,
    cohorts: Option<CohortDefinitions>,
    #[serde(default)]
    age_groups: BTreeMap<String, RangeSet<u32>>,
    record_age_groups: Option<String>,
    los_categories: Option<RangeSet<f64>>,
    #[serde(default)]
    los_windows: BTreeMap<String, LosWindow>,
}

impl Config {
    /// The settings shipped in `data/config.toml`.
    pub fn builtin() -> Result<Self> {
        let raw: ConfigRaw = toml::from_str(BUILTIN).context("parsing built-in config")?;
        let config = Config {
            columns: raw.columns.unwrap_or_default(),
            identifier: raw.identifier.unwrap_or_default(),
            date_order: raw.date_order.unwrap_or_default(),
            cohorts: raw.cohorts.context("built-in config has no cohorts")?,
            age_groups: raw.age_groups,
            record_age_groups: raw
                .record_age_groups
                .context("built-in config has no `record_age_groups`")?,
            los_categories: raw
                .los_categories
                .context("built-in config has no `los_categories`")?,
            los_windows: raw.los_windows,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, layered over the built-in settings.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<Config> {
            let text = fs::read_to_string(path)?;
            Config::from_toml(&text)
        }
        let path = path.as_ref();
        crate::util::check_extension(path, "toml")?;
        inner(path).with_context(|| format!("loading config from \"{}\"", path.display()))
    }

    /// Use `path` if given, otherwise the built-in settings.
    pub fn load_or_builtin(path: Option<impl AsRef<Path>>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: ConfigRaw = toml::from_str(text)?;
        let mut config = Self::builtin()?;
        if let Some(columns) = raw.columns {
            config.columns = columns;
        }
        if let Some(identifier) = raw.identifier {
            config.identifier = identifier;
        }
        if let Some(date_order) = raw.date_order {
            config.date_order = date_order;
        }
        if let Some(cohorts) = raw.cohorts {
            config.cohorts = cohorts;
        }
        // named sets and windows are merged, so a file can add one without repeating the rest.
        config.age_groups.extend(raw.age_groups);
        if let Some(name) = raw.record_age_groups {
            config.record_age_groups = name;
        }
        if let Some(categories) = raw.los_categories {
            config.los_categories = categories;
        }
        config.los_windows.extend(raw.los_windows);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result {
        ensure!(
            self.age_groups.contains_key(&self.record_age_groups),
            "`record_age_groups` is \"{}\", but there is no age group set with that name",
            self.record_age_groups
        );
        ensure!(
            !self.identifier.prefix.is_empty() || self.identifier.min_len > 0,
            "identifier layout needs a prefix or a minimum length"
        );
        for offset in [
            self.identifier.year_offset,
            self.identifier.month_offset,
            self.identifier.day_offset,
        ] {
            ensure!(
                offset + 2 <= self.identifier.min_len,
                "identifier date offset {} is past the minimum length {}",
                offset,
                self.identifier.min_len
            );
        }
        Ok(())
    }

    pub fn age_groups(&self, name: &str) -> Result<&RangeSet<u32>> {
        self.age_groups.get(name).ok_or_else(|| {
            format_err!(
                "no age group set called \"{}\" (have: {})",
                name,
                self.age_groups
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }

    /// The age groups stored on each admission.
    pub fn record_age_groups(&self) -> Result<&RangeSet<u32>> {
        self.age_groups(&self.record_age_groups)
    }

    pub fn los_window(&self, name: &str) -> Result<LosWindow> {
        self.los_windows.get(name).copied().ok_or_else(|| {
            format_err!(
                "no LOS window called \"{}\" (have: {})",
                name,
                self.los_windows
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }
}
