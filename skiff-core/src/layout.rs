//! Layout chains.
//!
//! A page's `layout` names a template that wraps the page's `content`. The
//! layout record can name its own `layout`, and so on until a template with
//! no parent. Each page walks its chain on its own; pages share nothing but
//! read-only templates, data and collections, so the walk runs in parallel.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{error, trace};

use crate::collection::Collections;
use crate::data::GlobalData;
use crate::record::FileRecord;
use crate::template::{Scope, TemplateError, Templates, normalize_ref};

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("layout `{0}` not found")]
    Missing(String),
    #[error("layout chain loops back to `{0}`")]
    Cycle(String),
    #[error("layout `{layout}` failed: {source}")]
    Render {
        layout: String,
        #[source]
        source: TemplateError,
    },
}

/// Where one page is in its layout walk.
#[derive(Debug)]
pub enum LayoutState {
    NeedsLayout(String),
    Resolving(String),
    Resolved,
    Error(LayoutError),
}

pub struct LayoutResolver<'a> {
    templates: &'a Templates,
    /// Layout template key → the layout it wraps itself in.
    parents: HashMap<String, Option<String>>,
    includes_dir: &'a str,
    data: &'a GlobalData,
    collections: &'a Collections,
}

impl<'a> LayoutResolver<'a> {
    pub fn new(
        files: &[FileRecord],
        templates: &'a Templates,
        includes_dir: &'a str,
        data: &'a GlobalData,
        collections: &'a Collections,
    ) -> Self {
        let parents = files
            .iter()
            .filter_map(|r| Some((normalize_ref(r.template.as_deref()?), r.layout.clone())))
            .collect();

        Self {
            templates,
            parents,
            includes_dir,
            data,
            collections,
        }
    }

    /// Registry key for a layout reference: the reference itself, or the
    /// same name inside the includes directory.
    pub fn lookup(&self, layout: &str) -> Option<String> {
        let direct = normalize_ref(layout);
        if self.templates.contains(&direct) {
            return Some(direct);
        }
        let included = normalize_ref(&format!("{}/{}", self.includes_dir.trim_matches('/'), direct));
        self.templates.contains(&included).then_some(included)
    }

    /// Wrap `record.content` in its layout chain.
    ///
    /// Returns [`LayoutState::Resolved`] or [`LayoutState::Error`]; on error
    /// the record keeps the content of the last layout that rendered.
    pub fn resolve(&self, record: &mut FileRecord) -> LayoutState {
        let mut state = match &record.layout {
            Some(layout) => LayoutState::NeedsLayout(layout.clone()),
            None => return LayoutState::Resolved,
        };
        let mut visited = HashSet::new();

        loop {
            state = match state {
                LayoutState::NeedsLayout(layout) => {
                    let Some(key) = self.lookup(&layout) else {
                        return LayoutState::Error(LayoutError::Missing(layout));
                    };
                    if !visited.insert(key.clone()) {
                        return LayoutState::Error(LayoutError::Cycle(key));
                    }
                    LayoutState::Resolving(key)
                }
                LayoutState::Resolving(key) => {
                    if let Err(e) = self.apply(&key, record) {
                        return LayoutState::Error(e);
                    }
                    match self.parents.get(&key).cloned().flatten() {
                        Some(parent) => LayoutState::NeedsLayout(parent),
                        None => LayoutState::Resolved,
                    }
                }
                done => return done,
            };
        }
    }

    fn apply(&self, key: &str, record: &mut FileRecord) -> Result<(), LayoutError> {
        let template = self
            .templates
            .get(key)
            .ok_or_else(|| LayoutError::Missing(key.to_string()))?;
        let html = template
            .render(&Scope {
                data: self.data,
                collections: self.collections,
                context: record,
            })
            .map_err(|source| LayoutError::Render {
                layout: key.to_string(),
                source,
            })?;
        trace!(page = %record.relative_path, layout = key, "applied layout");
        record.content = Some(html);
        Ok(())
    }
}

/// Resolve layouts for every page in parallel. Returns how many failed.
pub fn resolve_layouts(
    files: &mut [FileRecord],
    templates: &Templates,
    includes_dir: &str,
    data: &GlobalData,
    collections: &Collections,
) -> usize {
    let resolver = LayoutResolver::new(files, templates, includes_dir, data, collections);

    files
        .par_iter_mut()
        .filter(|record| record.is_page())
        .map(|record| match resolver.resolve(record) {
            LayoutState::Error(e) => {
                error!(page = %record.relative_path, error = %e, "layout failed");
                1
            }
            _ => 0,
        })
        .sum()
}
