use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{debug, error};

use crate::collection::Collections;
use crate::data::GlobalData;
use crate::record::FileRecord;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template error: {}", error_chain(.0))]
    Tera(#[from] tera::Error),
    #[error("no template registered for `{0}`")]
    Missing(String),
    #[error("{0}")]
    Render(String),
}

/// Tera nests the useful message in its source chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Everything a template can see while rendering one record.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub data: &'a GlobalData,
    pub collections: &'a Collections,
    pub context: &'a FileRecord,
}

impl Scope<'_> {
    /// Tera context with `data`, `collections`, `context` and `content`.
    pub fn to_context(&self) -> Result<Context, TemplateError> {
        let mut context = Context::new();
        context.try_insert("data", self.data)?;
        context.try_insert("collections", self.collections)?;
        context.try_insert("context", self.context)?;
        context.try_insert("content", self.context.content.as_deref().unwrap_or_default())?;
        Ok(context)
    }
}

/// A page or layout template.
///
/// Implemented for Tera files found in the source tree, and for any closure
/// `Fn(&Scope) -> Result<String, TemplateError>`.
pub trait Template: Send + Sync {
    fn render(&self, scope: &Scope<'_>) -> Result<String, TemplateError>;
}

impl<F> Template for F
where
    F: Fn(&Scope<'_>) -> Result<String, TemplateError> + Send + Sync,
{
    fn render(&self, scope: &Scope<'_>) -> Result<String, TemplateError> {
        self(scope)
    }
}

/// One template inside a shared [`Tera`] instance.
pub struct TeraTemplate {
    tera: Arc<Tera>,
    name: String,
}

impl Template for TeraTemplate {
    fn render(&self, scope: &Scope<'_>) -> Result<String, TemplateError> {
        Ok(self.tera.render(&self.name, &scope.to_context()?)?)
    }
}

/// Templates keyed by normalized relative path.
#[derive(Default, Clone)]
pub struct Templates {
    entries: HashMap<String, Arc<dyn Template>>,
}

impl std::fmt::Debug for Templates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("Templates").field("keys", &keys).finish()
    }
}

impl Templates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile every template-class record into one Tera instance, so
    /// `{% extends %}` and `{% include %}` can refer to each other by path.
    ///
    /// A template that fails to parse is logged and left out.
    pub fn from_records(records: &[FileRecord]) -> Self {
        let sources: Vec<(String, &str)> = records
            .iter()
            .filter_map(|r| Some((normalize_ref(r.template.as_deref()?), r.template_body.as_deref()?)))
            .collect();

        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);

        if let Err(e) = tera.add_raw_templates(sources.iter().map(|(n, b)| (n.as_str(), *b))) {
            debug!(error = %error_chain(&e), "batch template load failed, isolating bad templates");
            let parsed: Vec<&(String, &str)> = sources
                .iter()
                .filter(|(name, body)| match tera::Template::new(name, None, body) {
                    Ok(_) => true,
                    Err(e) => {
                        error!(template = %name, error = %error_chain(&e), "failed to compile template");
                        false
                    }
                })
                .collect();

            tera = Tera::default();
            tera.autoescape_on(vec![]);
            if let Err(e) = tera.add_raw_templates(parsed.iter().map(|(n, b)| (n.as_str(), *b))) {
                // Broken inheritance: fall back to whatever loads on its own.
                error!(error = %error_chain(&e), "template inheritance is broken");
                tera = Tera::default();
                tera.autoescape_on(vec![]);
                for (name, body) in parsed {
                    if let Err(e) = tera.add_raw_template(name, body) {
                        error!(template = %name, error = %error_chain(&e), "failed to load template");
                    }
                }
            }
        }

        let names: Vec<String> = tera.get_template_names().map(str::to_string).collect();
        let tera = Arc::new(tera);
        let mut templates = Self::new();
        for name in names {
            templates.entries.insert(
                name.clone(),
                Arc::new(TeraTemplate {
                    tera: Arc::clone(&tera),
                    name,
                }),
            );
        }
        templates
    }

    pub fn register(&mut self, key: &str, template: Arc<dyn Template>) {
        self.entries.insert(normalize_ref(key), template);
    }

    /// Add every entry of `other`, replacing same-keyed templates.
    pub fn extend(&mut self, other: &Templates) {
        for (key, template) in &other.entries {
            self.entries.insert(key.clone(), Arc::clone(template));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn Template>> {
        self.entries.get(&normalize_ref(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize_ref(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `./a/b.tera` and `/a/b.tera` both name `a/b.tera`.
pub fn normalize_ref(key: &str) -> String {
    let mut key = key;
    while let Some(rest) = key.strip_prefix("./") {
        key = rest;
    }
    key.trim_start_matches('/').to_string()
}

/// Fill `content` for every page: markdown pages take their rendered body,
/// template pages render their own template. Failures leave content unset.
pub fn apply_templates(
    files: &mut [FileRecord],
    templates: &Templates,
    data: &GlobalData,
    collections: &Collections,
) {
    files
        .par_iter_mut()
        .filter(|record| record.is_page())
        .for_each(|record| {
            if let Some(body) = &record.rendered_body {
                record.content = Some(body.clone());
                return;
            }
            let Some(key) = record.template.clone() else {
                return;
            };
            let result = match templates.get(&key) {
                Some(template) => template.render(&Scope {
                    data,
                    collections,
                    context: record,
                }),
                None => Err(TemplateError::Missing(key.clone())),
            };
            match result {
                Ok(html) => record.content = Some(html),
                Err(e) => error!(page = %record.relative_path, error = %e, "failed to render page"),
            }
        });
}
