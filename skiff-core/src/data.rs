use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::Settings;
use crate::record::{FileRecord, Membership};
use crate::scanner::in_dir;

/// Site-wide data keyed by data-file stem (`_data/authors.json` → `authors`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GlobalData(BTreeMap<String, Value>);

impl GlobalData {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for GlobalData {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Data key for a file name: everything before the first `.`.
pub fn data_key(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Capture data files from the data directory into [`GlobalData`].
///
/// Pure data files leave the file list. A data file whose payload declares
/// `collections` stays in the list as an ordinary record (its payload keys
/// become fields) and is still captured.
pub fn aggregate(settings: &Settings, files: Vec<FileRecord>) -> (GlobalData, Vec<FileRecord>) {
    let mut data = BTreeMap::new();
    let mut remaining = Vec::with_capacity(files.len());

    for mut file in files {
        let Some(payload) = file
            .data
            .as_ref()
            .filter(|_| in_dir(&file.relative_path, &settings.data_dir))
        else {
            remaining.push(file);
            continue;
        };

        let key = data_key(&file.name).to_string();
        debug!(key, path = %file.relative_path, "captured global data");
        data.insert(key, payload.clone());

        if let Some(Value::Object(map)) = &file.data {
            if let Some(membership) = map.get("collections") {
                file.collections = Some(Membership::from_value(membership.clone()));
                for (k, v) in map.iter().filter(|(k, _)| k.as_str() != "collections") {
                    file.fields.insert(k.clone(), v.clone());
                }
                remaining.push(file);
            }
        }
    }

    (GlobalData(data), remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data_file(rel: &str, payload: Value) -> FileRecord {
        let name = rel.rsplit('/').next().unwrap().to_string();
        FileRecord {
            data: Some(payload),
            ..FileRecord::synthetic(name, rel)
        }
    }

    #[test]
    fn test_data_files_are_captured_and_removed() {
        let settings = Settings::default();
        let files = vec![
            data_file("_data/site.json", json!({"title": "Skiff"})),
            data_file("_data/nav.yaml", json!(["home"])),
            FileRecord::synthetic("index.md", "index.md"),
        ];

        let (data, files) = aggregate(&settings, files);

        assert_eq!(data.len(), 2);
        assert_eq!(data.get("site"), Some(&json!({"title": "Skiff"})));
        assert_eq!(data.get("nav"), Some(&json!(["home"])));
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "index.md");
    }

    #[test]
    fn test_last_stem_wins() {
        let settings = Settings::default();
        let files = vec![
            data_file("_data/site.json", json!(1)),
            data_file("_data/site.yaml", json!(2)),
        ];
        let (data, _) = aggregate(&settings, files);
        assert_eq!(data.get("site"), Some(&json!(2)));
    }

    #[test]
    fn test_data_outside_data_dir_is_left_alone() {
        let settings = Settings::default();
        let files = vec![data_file("assets/manifest.json", json!({"a": 1}))];
        let (data, files) = aggregate(&settings, files);
        assert!(data.is_empty());
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_data_with_membership_stays_a_record() {
        let settings = Settings::default();
        let files = vec![data_file(
            "_data/talk.json",
            json!({"collections": "talks", "title": "Ownership"}),
        )];

        let (data, files) = aggregate(&settings, files);

        assert!(data.get("talk").is_some());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].collections, Some(Membership::One("talks".to_string())));
        assert_eq!(files[0].field_str("title"), Some("Ownership"));
    }

    #[test]
    fn test_data_key_uses_first_dot() {
        assert_eq!(data_key("posts.en.json"), "posts");
        assert_eq!(data_key("plain"), "plain");
    }
}
