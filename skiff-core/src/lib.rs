pub mod build;
pub mod collection;
pub mod config;
pub mod data;
pub mod date;
pub mod emit;
pub mod layout;
pub mod markdown;
pub mod plugin;
pub mod record;
pub mod scanner;
pub mod slug;
pub mod template;

// Re-export main types
pub use build::{BuildError, Site, SiteBuilder, build_site};
pub use collection::{Collections, SiteState};
pub use config::{ConfigError, Settings, SettingsOverrides};
pub use data::GlobalData;
pub use emit::{EmitReport, Emitter};
pub use plugin::{Plugin, PluginError};
pub use record::{FileRecord, PageType, PublishState};
pub use scanner::SiteScanner;
pub use template::{Scope, Template, TemplateError, Templates};
