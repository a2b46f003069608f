use std::fs::Metadata;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::Settings;
use crate::markdown::{FrontMatterError, render_markdown, render_markdown_fields, split_front_matter};
use crate::record::{FileRecord, PageType, PublishState};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Source directory does not exist: {}", .0.display())]
    MissingSource(PathBuf),
}

/// Why a single file could only be classified by its metadata.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    FrontMatter(#[from] FrontMatterError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// How a file's contents are interpreted, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    Markdown,
    Data,
    Template,
    Asset,
}

impl FileClass {
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "md" | "markdown" => FileClass::Markdown,
            "json" | "yaml" | "yml" | "toml" => FileClass::Data,
            "tera" | "html" => FileClass::Template,
            _ => FileClass::Asset,
        }
    }
}

pub struct SiteScanner<'a> {
    settings: &'a Settings,
}

impl<'a> SiteScanner<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Classify every file under the source root, sorted by relative path.
    pub fn scan(&self) -> Result<Vec<FileRecord>, ScanError> {
        let root = &self.settings.source_root;
        if !root.is_dir() {
            return Err(ScanError::MissingSource(root.clone()));
        }
        debug!(root = %root.display(), "scanning source tree");

        let mut records: Vec<FileRecord> = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| self.scan_file(entry.path()))
            .collect();

        records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        debug!(count = records.len(), "classified files");

        Ok(records)
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.')
            || self.settings.ignore.iter().any(|i| *i == name)
            || self.settings.pass.iter().any(|p| *p == name)
            || name == self.settings.output_dir.as_str()
    }

    /// Classify one file. Only a failure to stat the file drops it; content
    /// extraction failures fall back to the metadata-only record.
    pub fn scan_file(&self, path: &Path) -> Option<FileRecord> {
        let metadata = match path.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat file");
                return None;
            }
        };

        let base = self.metadata_record(path, &metadata);
        let mut record = base.clone();

        let extracted = match FileClass::from_extension(&record.extension) {
            FileClass::Markdown => self.extract_markdown(path, &mut record),
            FileClass::Data => self.extract_data(path, &mut record),
            FileClass::Template => self.extract_template(path, &mut record),
            FileClass::Asset => Ok(()),
        };

        let mut record = match extracted {
            Ok(()) => record,
            Err(e) => {
                warn!(path = %base.relative_path, error = %e, "extraction failed, keeping metadata only");
                base
            }
        };

        if record.state.is_none() && in_dir(&record.relative_path, &self.settings.drafts_dir) {
            record.state = Some(PublishState::Draft);
        }

        Some(record)
    }

    fn metadata_record(&self, path: &Path, metadata: &Metadata) -> FileRecord {
        let relative_path = path
            .strip_prefix(&self.settings.source_root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        FileRecord {
            extension: get_extension(&name),
            name,
            relative_path,
            origin: Some(std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())),
            size: metadata.len(),
            created: metadata.created().ok().map(DateTime::<Utc>::from),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            ..Default::default()
        }
    }

    fn extract_markdown(&self, path: &Path, record: &mut FileRecord) -> Result<(), ExtractError> {
        let text = std::fs::read_to_string(path)?;
        let (front, body) = split_front_matter(&text)?;

        record.apply_front_matter(front);
        record.rendered_body = Some(render_markdown(body));
        self.default_page_type(record);

        Ok(())
    }

    fn extract_template(&self, path: &Path, record: &mut FileRecord) -> Result<(), ExtractError> {
        let text = std::fs::read_to_string(path)?;
        let (front, body) = split_front_matter(&text)?;

        record.apply_front_matter(front);
        record.template_body = Some(body.to_string());
        record.template = Some(record.relative_path.clone());
        self.default_page_type(record);

        Ok(())
    }

    fn extract_data(&self, path: &Path, record: &mut FileRecord) -> Result<(), ExtractError> {
        let text = std::fs::read_to_string(path)?;
        let data: Value = match record.extension.to_ascii_lowercase().as_str() {
            "json" => serde_json::from_str(&text)?,
            "toml" => toml::from_str(&text)?,
            _ => serde_yaml::from_str(&text)?,
        };

        record.data = Some(render_markdown_fields(data));
        Ok(())
    }

    /// Markdown and template files are pages unless they are layouts or
    /// their front matter already said otherwise.
    fn default_page_type(&self, record: &mut FileRecord) {
        if record.page_type.is_none() && !self.is_layout(&record.relative_path) {
            record.page_type = Some(PageType::Page);
        }
    }

    pub fn is_layout(&self, relative_path: &str) -> bool {
        in_dir(relative_path, &self.settings.includes_dir)
    }
}

/// Whether a forward-slash relative path lies under `dir` (also relative).
pub fn in_dir(relative_path: &str, dir: &str) -> bool {
    let dir = dir.trim_matches('/');
    !dir.is_empty()
        && relative_path
            .trim_start_matches('/')
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn get_extension(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Membership;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn settings_for(root: &Path) -> Settings {
        Settings {
            source_root: root.to_path_buf(),
            pass: vec!["static".to_string()],
            ..Settings::default()
        }
    }

    fn find<'r>(records: &'r [FileRecord], rel: &str) -> &'r FileRecord {
        records
            .iter()
            .find(|r| r.relative_path == rel)
            .unwrap_or_else(|| panic!("no record for {rel}"))
    }

    #[test]
    fn test_walk_skips_excluded_entries() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "index.md", "# Home");
        write(root, "posts/a.md", "# A");
        write(root, ".hidden/secret.md", "# no");
        write(root, ".env", "KEY=1");
        write(root, "node_modules/pkg/index.js", "");
        write(root, "static/site.css", "body {}");
        write(root, "_site/index.html", "old output");
        write(root, "skiff.toml", "");

        let settings = settings_for(root);
        let records = SiteScanner::new(&settings).scan().unwrap();
        let paths: Vec<&str> = records.iter().map(|r| r.relative_path.as_str()).collect();

        assert_eq!(paths, vec!["index.md", "posts/a.md"]);
    }

    #[test]
    fn test_output_dir_name_is_skipped_at_any_depth() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "docs/guide.md", "# Guide");
        write(root, "docs/_site/stale.md", "# old");
        write(root, "a/b/_site/index.html", "old");

        let settings = settings_for(root);
        let records = SiteScanner::new(&settings).scan().unwrap();
        let paths: Vec<&str> = records.iter().map(|r| r.relative_path.as_str()).collect();

        assert_eq!(paths, vec!["docs/guide.md"]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let settings = Settings {
            source_root: PathBuf::from("/no/such/source/root"),
            ..Settings::default()
        };
        assert!(matches!(
            SiteScanner::new(&settings).scan(),
            Err(ScanError::MissingSource(_))
        ));
    }

    #[test]
    fn test_markdown_classification() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(
            root,
            "posts/hello.md",
            "---\ntitle: Hello\ncollections: posts\nstate: publish\n---\n# Hello\n",
        );

        let settings = settings_for(root);
        let records = SiteScanner::new(&settings).scan().unwrap();
        let post = find(&records, "posts/hello.md");

        assert_eq!(post.name, "hello.md");
        assert_eq!(post.extension, "md");
        assert!(post.size > 0);
        assert!(post.origin.as_ref().unwrap().is_absolute());
        assert_eq!(post.field_str("title"), Some("Hello"));
        assert_eq!(post.collections, Some(Membership::One("posts".to_string())));
        assert_eq!(post.state, Some(PublishState::Publish));
        assert!(post.is_page());
        assert!(post.rendered_body.as_deref().unwrap().contains("<h1>Hello</h1>"));
    }

    #[test]
    fn test_bad_front_matter_degrades_to_metadata() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "broken.md", "---\ntitle: [oops\n---\nbody");
        write(root, "fine.md", "---\ntitle: Fine\n---\nbody");

        let settings = settings_for(root);
        let records = SiteScanner::new(&settings).scan().unwrap();
        assert_eq!(records.len(), 2);

        let broken = find(&records, "broken.md");
        assert!(broken.rendered_body.is_none());
        assert!(broken.page_type.is_none());
        assert!(broken.fields.is_empty());
        assert!(find(&records, "fine.md").rendered_body.is_some());
    }

    #[test]
    fn test_data_files_and_markdown_fields() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "_data/site.json", r#"{"name": "Skiff", "about_md": "*hi*"}"#);
        write(root, "_data/nav.yaml", "- home\n- blog\n");
        write(root, "_data/build.toml", "version = 2\n");
        write(root, "_data/broken.json", "{ nope");

        let settings = settings_for(root);
        let records = SiteScanner::new(&settings).scan().unwrap();

        let site = find(&records, "_data/site.json");
        let data = site.data.as_ref().unwrap();
        assert_eq!(data["name"], json!("Skiff"));
        assert!(data["about_md"].as_str().unwrap().contains("<em>hi</em>"));
        assert!(site.page_type.is_none());

        assert_eq!(find(&records, "_data/nav.yaml").data, Some(json!(["home", "blog"])));
        assert_eq!(find(&records, "_data/build.toml").data, Some(json!({"version": 2})));
        assert!(find(&records, "_data/broken.json").data.is_none());
    }

    #[test]
    fn test_templates_layouts_and_drafts() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "about.tera", "---\nlayout: _includes/base.tera\n---\n<p>{{ context.name }}</p>");
        write(root, "_includes/base.tera", "---\nlayout: _includes/root.tera\n---\n<main>{{ content }}</main>");
        write(root, "_drafts/wip.md", "# WIP");
        write(root, "logo.png", "png");

        let settings = settings_for(root);
        let records = SiteScanner::new(&settings).scan().unwrap();

        let about = find(&records, "about.tera");
        assert!(about.is_page());
        assert_eq!(about.template.as_deref(), Some("about.tera"));
        assert_eq!(about.template_body.as_deref(), Some("<p>{{ context.name }}</p>"));

        let base = find(&records, "_includes/base.tera");
        assert!(base.page_type.is_none());
        assert_eq!(base.layout.as_deref(), Some("_includes/root.tera"));

        assert_eq!(find(&records, "_drafts/wip.md").state, Some(PublishState::Draft));

        let logo = find(&records, "logo.png");
        assert_eq!(logo.extension, "png");
        assert!(logo.page_type.is_none());
    }

    #[test]
    fn test_in_dir_and_extension() {
        assert!(in_dir("_data/site.json", "_data"));
        assert!(in_dir("_data/nested/x.json", "_data/"));
        assert!(!in_dir("_database/x.json", "_data"));
        assert!(!in_dir("_data", "_data"));
        assert_eq!(get_extension("archive.tar.gz"), "gz");
        assert_eq!(get_extension("Makefile"), "");
        assert_eq!(get_extension(".bashrc"), "");
    }
}
