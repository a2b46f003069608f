use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::record::PublishState;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parsing(#[from] toml::de::Error),
}

/// Fully resolved build settings.
///
/// Produced once per build by [`Settings::resolve`] and shared behind an
/// `Arc` afterwards; nothing in the pipeline mutates it.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Settings {
    pub source_root: PathBuf,
    pub output_dir: String,
    pub includes_dir: String,
    pub drafts_dir: String,
    pub data_dir: String,
    pub collections_dir: String,
    pub ignore: Vec<String>,
    pub pass: Vec<String>,
    pub collect: Vec<CollectionRule>,
    pub plugins: Vec<PluginConfig>,
    pub clean: bool,
    pub cool_urls: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("."),
            output_dir: "_site".to_string(),
            includes_dir: "_includes".to_string(),
            drafts_dir: "_drafts".to_string(),
            data_dir: "_data".to_string(),
            collections_dir: "_collections".to_string(),
            ignore: vec![
                ".git".to_string(),
                "target".to_string(),
                "node_modules".to_string(),
                "skiff.toml".to_string(),
                "Cargo.toml".to_string(),
                "Cargo.lock".to_string(),
            ],
            pass: Vec::new(),
            collect: Vec::new(),
            plugins: Vec::new(),
            clean: true,
            cool_urls: false,
        }
    }
}

impl Settings {
    /// Merge user overrides onto the defaults.
    ///
    /// List options are `default ++ user` with no de-duplication; every other
    /// option is the user's value when present.
    pub fn resolve(user: SettingsOverrides) -> Self {
        let defaults = Self::default();

        Self {
            source_root: user.source_root.unwrap_or(defaults.source_root),
            output_dir: user.output_dir.unwrap_or(defaults.output_dir),
            includes_dir: user.includes_dir.unwrap_or(defaults.includes_dir),
            drafts_dir: user.drafts_dir.unwrap_or(defaults.drafts_dir),
            data_dir: user.data_dir.unwrap_or(defaults.data_dir),
            collections_dir: user.collections_dir.unwrap_or(defaults.collections_dir),
            ignore: concat(defaults.ignore, user.ignore),
            pass: concat(defaults.pass, user.pass),
            collect: concat(defaults.collect, user.collect),
            plugins: concat(defaults.plugins, user.plugins),
            clean: user.clean.unwrap_or(defaults.clean),
            cool_urls: user.cool_urls.unwrap_or(defaults.cool_urls),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.source_root.join(&self.output_dir)
    }
}

fn concat<T>(mut defaults: Vec<T>, user: Option<Vec<T>>) -> Vec<T> {
    defaults.extend(user.unwrap_or_default());
    defaults
}

/// User-supplied settings, every option optional.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SettingsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub includes_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drafts_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<Vec<String>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_rules"
    )]
    pub collect: Option<Vec<CollectionRule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<PluginConfig>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cool_urls: Option<bool>,
}

impl SettingsOverrides {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let overrides: SettingsOverrides = toml::from_str(&data)?;

        Ok(overrides)
    }
}

/// Read `collect` one rule at a time. A malformed rule is skipped and a
/// value that is not a list counts as no rules, so neither fails the load.
fn lenient_rules<'de, D>(deserializer: D) -> Result<Option<Vec<CollectionRule>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.map(rules_from_value))
}

fn rules_from_value(raw: Value) -> Vec<CollectionRule> {
    let Value::Array(entries) = raw else {
        error!(value = %raw, "`collect` must be a list of rules, ignoring it");
        return Vec::new();
    };

    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value::<CollectionRule>(entry) {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!(index, error = %e, "skipping malformed collection rule");
                None
            }
        })
        .collect()
}

/// One `[[collect]]` entry: a source collection plus the action(s) run on it.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct CollectionRule {
    #[serde(alias = "name")]
    pub collection: String,
    #[serde(flatten)]
    pub step: ActionSpec,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionSpec>,
}

impl CollectionRule {
    /// The actions this rule runs, in order. Empty when the rule names none.
    pub fn steps(&self) -> Vec<&ActionSpec> {
        if !self.actions.is_empty() {
            self.actions.iter().collect()
        } else if self.step.action.is_some() {
            vec![&self.step]
        } else {
            Vec::new()
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ActionSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<PublishState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Sort request for grouped pagination. Kept as loose strings so a bad
/// value is reported when the rule runs instead of failing config loading.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SortSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct PluginConfig {
    pub name: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}
