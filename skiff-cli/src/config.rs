use anyhow::Result;
use clap::ArgMatches;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use skiff_core::{Settings, SettingsOverrides};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "skiff.toml";

/// Complete configuration that merges CLI args, env vars, config files, and defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Options for the `skiff` binary itself (`[build]` in skiff.toml)
    pub build: BuildConfig,
    /// Site settings, resolved against defaults by skiff-core
    #[serde(flatten)]
    pub site: SettingsOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Host for dev server
    pub host: String,
    /// Port for dev server
    pub port: u16,
    /// Open browser automatically
    pub open: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            open: false,
        }
    }
}

impl ProjectConfig {
    /// Load configuration with cascading precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables (SKIFF_*, `__` for nesting)
    /// 3. Configuration file
    /// 4. Defaults (lowest priority)
    pub fn load(args: &ArgMatches) -> Result<Self> {
        let source = arg::<String>(args, "source");
        let config_file = config_path(arg::<String>(args, "config").as_deref(), source.as_deref());

        let mut builder = ConfigBuilder::builder();

        // 1. Start with defaults
        builder = builder.add_source(ConfigBuilder::try_from(&Self::default())?);

        // 2. Add configuration file if it exists
        if config_file.is_file() {
            builder = builder.add_source(File::from(config_file.as_path()).format(FileFormat::Toml));
        }

        // 3. Add environment variables with SKIFF_ prefix
        builder = builder.add_source(
            Environment::with_prefix("SKIFF")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. Override with CLI arguments that are defined for this command
        if let Some(source) = source {
            builder = builder.set_override("source_root", source)?;
        }
        if let Some(output) = arg::<String>(args, "output") {
            builder = builder.set_override("output_dir", output)?;
        }
        if let Some(host) = arg::<String>(args, "host") {
            builder = builder.set_override("build.host", host)?;
        }
        if let Some(port) = arg::<u16>(args, "port") {
            builder = builder.set_override("build.port", i64::from(port))?;
        }
        if arg::<bool>(args, "open").unwrap_or(false) {
            builder = builder.set_override("build.open", true)?;
        }

        let config: ProjectConfig = builder.build()?.try_deserialize()?;

        Ok(config)
    }

    /// Resolved site settings for skiff-core
    pub fn settings(&self) -> Settings {
        Settings::resolve(self.site.clone())
    }
}

/// An argument's value, or `None` when it is absent or not defined for
/// this command.
fn arg<T: Clone + Send + Sync + 'static>(args: &ArgMatches, id: &str) -> Option<T> {
    args.try_get_one::<T>(id).ok().flatten().cloned()
}

/// `--config` when given, otherwise `skiff.toml` in the source directory.
pub fn config_path(config: Option<&str>, source: Option<&str>) -> PathBuf {
    match (config, source) {
        (Some(config), _) => PathBuf::from(config),
        (None, Some(source)) => Path::new(source).join(DEFAULT_CONFIG_FILE),
        (None, None) => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// Load configuration specifically for build commands
pub fn load_build_config(args: &ArgMatches) -> Result<ProjectConfig> {
    ProjectConfig::load(args)
}

/// Load configuration specifically for serve commands
pub fn load_serve_config(args: &ArgMatches) -> Result<ProjectConfig> {
    ProjectConfig::load(args)
}
