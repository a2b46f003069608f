use thiserror::Error;
use tracing::{error, info, warn};

use crate::build::Site;
use crate::config::PluginConfig;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid plugin options: {0}")]
    Options(String),
    #[error("{0}")]
    Failed(String),
}

/// A post-build step. Runs once per configured `[[plugins]]` entry whose
/// `name` matches, after every page has been emitted.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, site: &Site, config: &PluginConfig) -> Result<(), PluginError>;
}

/// Run configured plugins in order against the registered ones.
///
/// Returns the number of plugin runs that succeeded. Unknown names and
/// failures are logged and never stop the remaining plugins.
pub fn run_plugins(site: &Site, registered: &[Box<dyn Plugin>], configured: &[PluginConfig]) -> usize {
    let mut succeeded = 0;

    for config in configured {
        let Some(plugin) = registered.iter().find(|p| p.name() == config.name) else {
            warn!(plugin = %config.name, "no plugin registered under this name");
            continue;
        };
        match plugin.run(site, config) {
            Ok(()) => {
                info!(plugin = %config.name, "plugin finished");
                succeeded += 1;
            }
            Err(e) => error!(plugin = %config.name, error = %e, "plugin failed"),
        }
    }

    succeeded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn run(&self, site: &Site, config: &PluginConfig) -> Result<(), PluginError> {
            let label = match config.options.get("label") {
                Some(Value::String(label)) => label.clone(),
                _ => return Err(PluginError::Options("label must be a string".to_string())),
            };
            self.seen
                .lock()
                .unwrap()
                .push(format!("{label}:{}", site.files.len()));
            Ok(())
        }
    }

    fn config(name: &str, label: Option<&str>) -> PluginConfig {
        let mut config = PluginConfig {
            name: name.to_string(),
            ..Default::default()
        };
        if let Some(label) = label {
            config
                .options
                .insert("label".to_string(), Value::String(label.to_string()));
        }
        config
    }

    #[test]
    fn test_runs_matching_plugins_in_order() {
        let site = Site::empty(Settings::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registered: Vec<Box<dyn Plugin>> = vec![Box::new(Recorder {
            seen: Arc::clone(&seen),
        })];
        let configured = vec![
            config("recorder", Some("first")),
            config("sitemap", None),
            config("recorder", None),
            config("recorder", Some("second")),
        ];

        let succeeded = run_plugins(&site, &registered, &configured);

        assert_eq!(succeeded, 2);
        assert_eq!(*seen.lock().unwrap(), vec!["first:0", "second:0"]);
    }
}
