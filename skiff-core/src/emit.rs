use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::record::{FileRecord, PublishState};

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to clean {}: {source}", path.display())]
    Clean { path: PathBuf, source: io::Error },
    #[error("failed to copy {}: {source}", path.display())]
    Copy { path: PathBuf, source: io::Error },
}

/// What happened to each page during emission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmitReport {
    pub written: Vec<PathBuf>,
    pub drafts: Vec<String>,
    pub unset: Vec<String>,
    pub empty: Vec<String>,
    pub failed: Vec<String>,
}

/// Output path (with a leading `/`) for a page's relative path.
///
/// `about.md` → `/about/index.html`, or `/about.html` with cool URLs. The
/// site root (`""`, `index.*`, `home.*`) and any nested `index.*` always map
/// to an `index.html`.
pub fn destination(relative_path: &str, cool_urls: bool) -> String {
    let trimmed = relative_path.trim_matches('/');
    let (dir, file) = match trimmed.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, trimmed),
    };
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    };

    match (dir, stem) {
        (None, "" | "index" | "home") => "/index.html".to_string(),
        (Some(dir), "index") => format!("/{dir}/index.html"),
        (Some(dir), stem) if cool_urls => format!("/{dir}/{stem}.html"),
        (Some(dir), stem) => format!("/{dir}/{stem}/index.html"),
        (None, stem) if cool_urls => format!("/{stem}.html"),
        (None, stem) => format!("/{stem}/index.html"),
    }
}

/// Insert `snippet` before the last `</body>`, or append it.
pub fn inject_before_body_close(html: &str, snippet: &str) -> String {
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => format!("{}{}{}", &html[..at], snippet, &html[at..]),
        None => format!("{html}{snippet}"),
    }
}

pub struct Emitter {
    output_dir: PathBuf,
    cool_urls: bool,
    live_reload: Option<String>,
}

impl Emitter {
    pub fn new<P: AsRef<Path>>(output_dir: P, cool_urls: bool) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            cool_urls,
            live_reload: None,
        }
    }

    /// Inject `snippet` into every emitted page.
    pub fn with_live_reload(mut self, snippet: impl Into<String>) -> Self {
        self.live_reload = Some(snippet.into());
        self
    }

    /// Write every published page, in order. A failed write is logged and
    /// the rest of the pages are still written.
    pub fn emit(&self, files: &[FileRecord]) -> EmitReport {
        let mut report = EmitReport::default();

        for record in files.iter().filter(|r| r.is_page()) {
            match record.state {
                Some(PublishState::Publish) => {}
                Some(PublishState::Draft) => {
                    info!(page = %record.relative_path, "skipping draft");
                    report.drafts.push(record.relative_path.clone());
                    continue;
                }
                None => {
                    warn!(page = %record.relative_path, "no publish state, not emitting");
                    report.unset.push(record.relative_path.clone());
                    continue;
                }
            }

            let Some(content) = record.content.as_deref().filter(|c| !c.is_empty()) else {
                warn!(page = %record.relative_path, "page has no content, not emitting");
                report.empty.push(record.relative_path.clone());
                continue;
            };

            let dest = destination(&record.relative_path, self.cool_urls);
            match self.write(&dest, content) {
                Ok(path) => {
                    info!(page = %record.relative_path, to = %dest, "wrote page");
                    report.written.push(path);
                }
                Err(e) => {
                    error!(page = %record.relative_path, error = %e, "failed to write page");
                    report.failed.push(record.relative_path.clone());
                }
            }
        }

        report
    }

    fn write(&self, dest: &str, content: &str) -> Result<PathBuf, EmitError> {
        let path = self.output_dir.join(dest.trim_start_matches('/'));
        let fail = |source| EmitError::Write {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(fail)?;
        }
        let written = match &self.live_reload {
            Some(snippet) => fs::write(&path, inject_before_body_close(content, snippet)),
            None => fs::write(&path, content),
        };
        written.map_err(fail)?;

        Ok(path)
    }
}

/// Remove the output directory if it exists.
pub fn clean_output(output_dir: &Path) -> Result<(), EmitError> {
    if !output_dir.exists() {
        return Ok(());
    }
    debug!(dir = %output_dir.display(), "cleaning output");
    fs::remove_dir_all(output_dir).map_err(|source| EmitError::Clean {
        path: output_dir.to_path_buf(),
        source,
    })
}

/// Copy pass-through entries (files or whole directories) from the source
/// root into the output directory. Missing entries are warned about; a file
/// that cannot be copied is logged and added to `report.failed`, and copying
/// carries on with the rest. Returns the number of files copied.
pub fn copy_pass_through(source_root: &Path, output_dir: &Path, pass: &[String], report: &mut EmitReport) -> usize {
    let mut copied = 0;

    for entry in pass {
        let from = source_root.join(entry);
        if !from.exists() {
            warn!(entry, "pass-through entry does not exist");
            continue;
        }

        for item in WalkDir::new(&from) {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    let path = e.path().unwrap_or(from.as_path()).to_path_buf();
                    let e = EmitError::Copy { path, source: e.into() };
                    error!(error = %e, "pass-through copy failed");
                    report.failed.push(entry.clone());
                    continue;
                }
            };
            if !item.file_type().is_file() {
                continue;
            }

            let relative = item.path().strip_prefix(source_root).unwrap_or(item.path());
            match copy_file(item.path(), &output_dir.join(relative)) {
                Ok(()) => copied += 1,
                Err(e) => {
                    error!(error = %e, "pass-through copy failed");
                    report.failed.push(relative.to_string_lossy().into_owned());
                }
            }
        }
    }

    debug!(copied, "copied pass-through files");
    copied
}

fn copy_file(from: &Path, to: &Path) -> Result<(), EmitError> {
    let fail = |source| EmitError::Copy {
        path: from.to_path_buf(),
        source,
    };
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(fail)?;
    }
    fs::copy(from, to).map_err(fail)?;
    Ok(())
}
