use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishState {
    Publish,
    Draft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Page,
}

/// Collection tags declared by a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Membership {
    One(String),
    Many(Vec<String>),
    /// Neither a string nor a list of strings. Kept so grouping can report it.
    Malformed(Value),
}

impl Membership {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(tag) => Membership::One(tag),
            Value::Array(entries) => {
                if entries.iter().all(Value::is_string) {
                    Membership::Many(
                        entries
                            .into_iter()
                            .filter_map(|e| e.as_str().map(str::to_string))
                            .collect(),
                    )
                } else {
                    Membership::Malformed(Value::Array(entries))
                }
            }
            other => Membership::Malformed(other),
        }
    }
}

/// Next/previous/first/last slots of a listing page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageLinks<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<T>,
}

impl<T> Default for PageLinks<T> {
    fn default() -> Self {
        Self {
            next: None,
            previous: None,
            first: None,
            last: None,
        }
    }
}

impl<T> PageLinks<T> {
    pub fn is_empty(&self) -> bool {
        self.next.is_none() && self.previous.is_none() && self.first.is_none() && self.last.is_none()
    }
}

/// A materialized reference to one listing page, carried in `navigation_data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageRef {
    pub name: String,
    pub path: String,
    pub index: usize,
    pub items: Vec<FileRecord>,
}

/// One source file or one synthetic page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileRecord {
    pub name: String,
    pub relative_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<PathBuf>,
    pub extension: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Membership>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered_body: Option<String>,
    #[serde(skip)]
    pub template_body: Option<String>,
    /// Registry key of this record's own template, if it is template-class.
    #[serde(skip)]
    pub template: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub page_type: Option<PageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<PublishState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_date: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<FileRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hrefs: Vec<String>,
    #[serde(skip_serializing_if = "PageLinks::is_empty")]
    pub navigation: PageLinks<String>,
    #[serde(skip_serializing_if = "PageLinks::is_empty")]
    pub navigation_data: PageLinks<PageRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Remaining front-matter keys (`title`, `date`, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl FileRecord {
    /// A synthetic record with no backing file.
    pub fn synthetic(name: impl Into<String>, relative_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relative_path: relative_path.into(),
            ..Default::default()
        }
    }

    pub fn is_page(&self) -> bool {
        self.page_type == Some(PageType::Page)
    }

    pub fn is_published(&self) -> bool {
        self.state == Some(PublishState::Publish)
    }

    /// Look up a named field: the record's own identity fields first, then
    /// front matter.
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "name" => Some(Value::String(self.name.clone())),
            "path" | "relative_path" => Some(Value::String(self.relative_path.clone())),
            "extension" => Some(Value::String(self.extension.clone())),
            _ => self.fields.get(key).cloned(),
        }
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Merge front matter into the record. Reserved keys populate typed
    /// fields; everything else lands in `fields`.
    pub fn apply_front_matter(&mut self, front: Map<String, Value>) {
        for (key, value) in front {
            match key.as_str() {
                "collections" => self.collections = Some(Membership::from_value(value)),
                "layout" => match value {
                    Value::String(layout) => self.layout = Some(layout),
                    Value::Null => self.layout = None,
                    other => warn!(record = %self.relative_path, value = %other, "layout must be a string"),
                },
                "state" => match serde_json::from_value::<PublishState>(value.clone()) {
                    Ok(state) => self.state = Some(state),
                    Err(_) => warn!(record = %self.relative_path, value = %value, "unknown state"),
                },
                "type" => match serde_json::from_value::<PageType>(value.clone()) {
                    Ok(page_type) => self.page_type = Some(page_type),
                    Err(_) => warn!(record = %self.relative_path, value = %value, "unknown page type"),
                },
                _ => {
                    self.fields.insert(key, value);
                }
            }
        }
    }
}
