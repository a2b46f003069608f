use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

use crate::collection::{Collections, build_collections};
use crate::config::Settings;
use crate::data::{GlobalData, aggregate};
use crate::emit::{EmitError, EmitReport, Emitter, clean_output, copy_pass_through};
use crate::layout::resolve_layouts;
use crate::plugin::{Plugin, run_plugins};
use crate::record::FileRecord;
use crate::scanner::{ScanError, SiteScanner};
use crate::template::{Scope, Template, TemplateError, Templates, apply_templates};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("Emit error: {0}")]
    Emit(#[from] EmitError),
    #[error("Output directory {} is the source directory", .0.display())]
    OutputIsSource(PathBuf),
}

/// A built site, handed to plugins and returned to callers.
#[derive(Debug)]
pub struct Site {
    pub settings: Arc<Settings>,
    pub files: Vec<FileRecord>,
    pub collections: Collections,
    pub data: GlobalData,
    pub report: EmitReport,
}

impl Site {
    pub fn empty(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            files: Vec::new(),
            collections: Collections::new(),
            data: GlobalData::default(),
            report: EmitReport::default(),
        }
    }

    /// Published pages, in file order.
    pub fn pages(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.iter().filter(|r| r.is_page() && r.is_published())
    }
}

pub struct SiteBuilder {
    settings: Arc<Settings>,
    templates: Templates,
    plugins: Vec<Box<dyn Plugin>>,
    live_reload: Option<String>,
}

impl SiteBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            templates: Templates::new(),
            plugins: Vec::new(),
            live_reload: None,
        }
    }

    /// Register a template under a relative path. It replaces any file-based
    /// template at the same path.
    pub fn template<T: Template + 'static>(mut self, path: &str, template: T) -> Self {
        self.templates.register(path, Arc::new(template));
        self
    }

    /// Register a closure as a template.
    pub fn template_fn<F>(self, path: &str, render: F) -> Self
    where
        F: Fn(&Scope<'_>) -> Result<String, TemplateError> + Send + Sync + 'static,
    {
        self.template(path, render)
    }

    pub fn plugin<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Inject `snippet` into every emitted page (serve mode).
    pub fn live_reload(mut self, snippet: impl Into<String>) -> Self {
        self.live_reload = Some(snippet.into());
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run the in-memory part of the pipeline over classified files:
    /// global data, collections, templates and layouts. Nothing is written.
    pub fn compile(&self, files: Vec<FileRecord>) -> Site {
        let settings = &self.settings;

        let (data, files) = aggregate(settings, files);
        debug!(keys = data.len(), "aggregated global data");

        let state = build_collections(settings, files);
        let collections = state.collections;
        let mut files = state.files;
        debug!(collections = collections.len(), files = files.len(), "assembled collections");

        let mut templates = Templates::from_records(&files);
        templates.extend(&self.templates);

        apply_templates(&mut files, &templates, &data, &collections);
        let failed = resolve_layouts(&mut files, &templates, &settings.includes_dir, &data, &collections);
        if failed > 0 {
            debug!(failed, "pages kept their content after layout errors");
        }

        Site {
            settings: Arc::clone(settings),
            files,
            collections,
            data,
            report: EmitReport::default(),
        }
    }

    /// Scan, compile and write the site, then run plugins.
    pub fn build(&self) -> Result<Site, BuildError> {
        let started = Instant::now();
        let settings = &self.settings;
        let output = settings.output_path();

        if same_dir(&output, &settings.source_root) {
            return Err(BuildError::OutputIsSource(output));
        }

        let files = SiteScanner::new(settings).scan()?;
        info!(files = files.len(), source = %settings.source_root.display(), "scanned source");

        let mut site = self.compile(files);

        if settings.clean {
            clean_output(&output)?;
        }

        let mut emitter = Emitter::new(&output, settings.cool_urls);
        if let Some(snippet) = &self.live_reload {
            emitter = emitter.with_live_reload(snippet.clone());
        }
        site.report = emitter.emit(&site.files);

        copy_pass_through(&settings.source_root, &output, &settings.pass, &mut site.report);

        run_plugins(&site, &self.plugins, &settings.plugins);

        info!(
            pages = site.report.written.len(),
            drafts = site.report.drafts.len(),
            failed = site.report.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            output = %output.display(),
            "site built"
        );

        Ok(site)
    }
}

fn same_dir(a: &std::path::Path, b: &std::path::Path) -> bool {
    match (std::path::absolute(a), std::path::absolute(b)) {
        (Ok(a), Ok(b)) => a.components().eq(b.components()),
        _ => a == b,
    }
}

/// Build with default templates and no plugins.
pub fn build_site(settings: Settings) -> Result<Site, BuildError> {
    SiteBuilder::new(settings).build()
}
