//! Tag collections and the `collect` rules that paginate them.
//!
//! Building collections is a two step fold:
//!
//! 1. [`group_by_membership`] files every record under each tag it declares
//!    (or under the folder it sits in below the collections directory).
//! 2. [`run_rules`] threads a [`SiteState`] through each configured rule in
//!    declaration order. Actions write their output back into the file list
//!    by record name ([`merge_back`]), so a later rule sees the effects of
//!    every earlier one.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::config::{ActionSpec, CollectionRule, Settings, SortSpec};
use crate::date::{DateFormat, parse_date};
use crate::record::{FileRecord, Membership, PageLinks, PageRef, PageType};
use crate::scanner::in_dir;
use crate::slug::slug_from_fields;

/// Tag → ordered records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Collections(BTreeMap<String, Vec<FileRecord>>);

impl Collections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tag: &str) -> Option<&[FileRecord]> {
        self.0.get(tag).map(Vec::as_slice)
    }

    pub fn get_mut(&mut self, tag: &str) -> Option<&mut Vec<FileRecord>> {
        self.0.get_mut(tag)
    }

    pub fn push(&mut self, tag: &str, record: FileRecord) {
        self.0.entry(tag.to_string()).or_default().push(record);
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The accumulator threaded through collection rules.
#[derive(Debug, Clone, Default)]
pub struct SiteState {
    pub files: Vec<FileRecord>,
    pub collections: Collections,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Paginate,
    PaginateGroups,
}

impl Action {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "paginate" => Some(Action::Paginate),
            "paginateGroups" | "paginate_groups" => Some(Action::PaginateGroups),
            _ => None,
        }
    }
}

/// Group records by the tags they declare.
///
/// A record without explicit tags that lives under
/// `{collections_dir}/{tag}/` joins `tag`. Malformed tags are reported and
/// the record is left out of every collection.
pub fn group_by_membership(settings: &Settings, files: &[FileRecord]) -> Collections {
    let mut collections = Collections::new();

    for file in files {
        match &file.collections {
            Some(Membership::One(tag)) => collections.push(tag, file.clone()),
            Some(Membership::Many(tags)) => {
                for tag in tags {
                    collections.push(tag, file.clone());
                }
            }
            Some(Membership::Malformed(value)) => {
                error!(
                    record = %file.relative_path,
                    value = %value,
                    "\"collections\" must be a string or a list of strings"
                );
            }
            None => {
                if let Some(tag) = folder_tag(settings, file) {
                    collections.push(tag, file.clone());
                }
            }
        }
    }

    collections
}

fn folder_tag<'f>(settings: &Settings, file: &'f FileRecord) -> Option<&'f str> {
    if !in_dir(&file.relative_path, &settings.collections_dir) {
        return None;
    }
    let rest = file
        .relative_path
        .trim_start_matches('/')
        .strip_prefix(settings.collections_dir.trim_matches('/'))?
        .trim_start_matches('/');
    // Only files inside a tag folder, not loose files in the collections root.
    rest.split_once('/').map(|(tag, _)| tag)
}

/// Classify files into collections and run every configured rule.
pub fn build_collections(settings: &Settings, files: Vec<FileRecord>) -> SiteState {
    let collections = group_by_membership(settings, &files);
    run_rules(SiteState { files, collections }, &settings.collect)
}

/// Run collection rules strictly in declaration order.
pub fn run_rules(state: SiteState, rules: &[CollectionRule]) -> SiteState {
    rules.iter().fold(state, |state, rule| {
        let steps = rule.steps();
        if steps.is_empty() {
            error!(collection = %rule.collection, "collection rule needs at least one action");
            return state;
        }
        steps
            .into_iter()
            .fold(state, |state, step| run_action(state, &rule.collection, step))
    })
}

fn run_action(mut state: SiteState, collection: &str, spec: &ActionSpec) -> SiteState {
    let name = spec.action.as_deref().unwrap_or_default();
    let Some(action) = Action::parse(name) else {
        error!(
            action = name,
            collection, "unknown action; available actions are paginate and paginateGroups"
        );
        return state;
    };

    let Some(source) = state.collections.get_mut(collection) else {
        warn!(collection, action = name, "collection is empty or undefined");
        return state;
    };

    let output = match action {
        Action::Paginate => {
            // Later rules see the rewritten records in the collection too.
            *source = paginate(source, spec);
            source.clone()
        }
        Action::PaginateGroups => paginate_groups(source, spec),
    };

    debug!(collection, action = name, produced = output.len(), "ran collection action");
    state.files = merge_back(state.files, output);
    state
}

/// Rewrite one record for `paginate`: path `{path}/{slug}`, and the rule's
/// state and layout where the record sets none.
fn apply_paginate(record: &mut FileRecord, spec: &ActionSpec) {
    let slug = match spec.slug.as_deref() {
        Some(fields) => slug_from_fields(record, fields),
        None => {
            error!(record = %record.name, "paginate needs a slug field list");
            String::new()
        }
    };
    record.relative_path = format!("{}/{}", spec.path.trim_end_matches('/'), slug);
    if record.state.is_none() {
        record.state = spec.state;
    }
    if record.layout.is_none() {
        record.layout = spec.layout.clone();
    }
}

/// One page per record, rewritten in place as `paginate` would.
pub fn paginate(source: &[FileRecord], spec: &ActionSpec) -> Vec<FileRecord> {
    source
        .iter()
        .cloned()
        .map(|mut record| {
            apply_paginate(&mut record, spec);
            record
        })
        .collect()
}

/// Chunk a collection into listing pages of `spec.size` records.
///
/// Chunk 0 lives at `{path}`, chunk `i` at `{path}/{i}`. Every page carries
/// all chunk hrefs sorted as strings, plus next/previous/first/last links
/// (none pointing at itself or past either end).
pub fn paginate_groups(source: &[FileRecord], spec: &ActionSpec) -> Vec<FileRecord> {
    let size = match spec.size {
        Some(size) if size > 0 => size,
        other => {
            error!(size = ?other, path = %spec.path, "paginateGroups needs a positive size");
            return Vec::new();
        }
    };

    let mut records = source.to_vec();
    if let Some(sort) = &spec.sort {
        sort_records(&mut records, sort);
    }

    let chunks: Vec<&[FileRecord]> = records.chunks(size).collect();
    if chunks.is_empty() {
        return Vec::new();
    }

    let base = spec.path.trim_end_matches('/');
    let href = |index: usize| -> String {
        match index {
            0 if base.is_empty() => "/".to_string(),
            0 => base.to_string(),
            i => format!("{base}/{i}"),
        }
    };
    let page_ref = |index: usize| PageRef {
        name: href(index),
        path: href(index),
        index,
        items: chunks[index].to_vec(),
    };

    let mut hrefs: Vec<String> = (0..chunks.len()).map(href).collect();
    hrefs.sort();

    let last = chunks.len() - 1;
    let neighbours = |position: usize| PageLinks {
        next: (position < last).then_some(position + 1),
        previous: position.checked_sub(1),
        first: (position > 0).then_some(0),
        last: (position < last).then_some(last),
    };

    chunks
        .iter()
        .enumerate()
        .map(|(position, chunk)| {
            let links = neighbours(position);
            let path = href(position);
            FileRecord {
                page_type: Some(PageType::Page),
                state: spec.state,
                layout: spec.layout.clone(),
                meta: spec.meta.clone(),
                items: chunk.to_vec(),
                hrefs: hrefs.clone(),
                navigation: PageLinks {
                    next: links.next.map(href),
                    previous: links.previous.map(href),
                    first: links.first.map(href),
                    last: links.last.map(href),
                },
                navigation_data: PageLinks {
                    next: links.next.map(page_ref),
                    previous: links.previous.map(page_ref),
                    first: links.first.map(page_ref),
                    last: links.last.map(page_ref),
                },
                ..FileRecord::synthetic(path.clone(), path)
            }
        })
        .collect()
}

/// Upsert `output` into `files` by record name: every record sharing a name
/// with an output record is replaced in place, new names are appended in
/// output order.
pub fn merge_back(mut files: Vec<FileRecord>, output: Vec<FileRecord>) -> Vec<FileRecord> {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, file) in files.iter().enumerate() {
        index.entry(file.name.clone()).or_default().push(i);
    }

    for record in output {
        match index.get(&record.name) {
            Some(positions) => {
                for &i in positions {
                    files[i] = record.clone();
                }
            }
            None => {
                index.insert(record.name.clone(), vec![files.len()]);
                files.push(record);
            }
        }
    }

    files
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortOrder {
    Descending,
    Ascending,
}

impl SortOrder {
    fn parse(order: Option<&str>, default: SortOrder) -> SortOrder {
        match order {
            None => default,
            Some("newest" | "descending" | "desc") => SortOrder::Descending,
            Some("oldest" | "ascending" | "asc") => SortOrder::Ascending,
            Some(other) => {
                warn!(order = other, "unknown sort order, using {:?}", default);
                default
            }
        }
    }

    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }
}

/// Present keys compare by `order`; missing keys always sort last.
fn compare_keys<K: Ord>(a: Option<&K>, b: Option<&K>, order: SortOrder) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => order.apply(a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sort records in place by `date` (the default) or `title`.
///
/// Dates are parsed into `parsed_date`; records whose date is missing or
/// unparseable keep `parsed_date = None` and end up last.
pub fn sort_records(records: &mut [FileRecord], sort: &SortSpec) {
    match sort.by.as_deref().unwrap_or("date") {
        "date" => {
            let format = match sort.format.as_deref().map(str::parse::<DateFormat>) {
                None => Some(DateFormat::default()),
                Some(Ok(format)) => Some(format),
                Some(Err(e)) => {
                    error!(error = %e, "cannot sort by date");
                    None
                }
            };
            for record in records.iter_mut() {
                record.parsed_date = format.and_then(|format| parse_record_date(record, format));
            }
            let order = SortOrder::parse(sort.order.as_deref(), SortOrder::Descending);
            records.sort_by(|a, b| compare_keys(a.parsed_date.as_ref(), b.parsed_date.as_ref(), order));
        }
        "title" => {
            let order = SortOrder::parse(sort.order.as_deref(), SortOrder::Ascending);
            records.sort_by(|a, b| {
                let a = a.field_str("title").map(title_key);
                let b = b.field_str("title").map(title_key);
                compare_keys(a.as_ref(), b.as_ref(), order)
            });
        }
        other => error!(by = other, "unknown sort key; keeping collection order"),
    }
}

fn parse_record_date(record: &FileRecord, format: DateFormat) -> Option<chrono::NaiveDateTime> {
    let Some(raw) = record.fields.get("date") else {
        warn!(record = %record.name, "no date to sort by");
        return None;
    };
    parse_date(raw, format)
        .map_err(|e| error!(record = %record.name, error = %e, "unparseable date"))
        .ok()
}

/// Accent- and case-insensitive key, raw title as tiebreaker.
fn title_key(title: &str) -> (String, String) {
    (deunicode::deunicode(title).to_lowercase(), title.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PublishState;
    use serde_json::json;

    fn post(name: &str, title: &str, date: &str) -> FileRecord {
        let mut record = FileRecord::synthetic(name, format!("posts/{name}"));
        record.collections = Some(Membership::One("posts".to_string()));
        record.fields.insert("title".to_string(), json!(title));
        record.fields.insert("date".to_string(), json!(date));
        record
    }

    fn groups(path: &str, size: usize) -> ActionSpec {
        ActionSpec {
            action: Some("paginateGroups".to_string()),
            path: path.to_string(),
            size: Some(size),
            state: Some(PublishState::Publish),
            ..Default::default()
        }
    }

    fn names(records: &[FileRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_membership_grouping() {
        let settings = Settings::default();
        let mut tagged = FileRecord::synthetic("a.md", "a.md");
        tagged.collections = Some(Membership::Many(vec!["posts".into(), "news".into()]));
        let mut broken = FileRecord::synthetic("b.md", "b.md");
        broken.collections = Some(Membership::Malformed(json!(7)));
        let foldered = FileRecord::synthetic("c.md", "_collections/talks/c.md");
        let loose = FileRecord::synthetic("d.md", "_collections/d.md");

        let collections = group_by_membership(&settings, &[tagged, broken, foldered, loose]);

        assert_eq!(collections.tags().collect::<Vec<_>>(), vec!["news", "posts", "talks"]);
        assert_eq!(names(collections.get("posts").unwrap()), vec!["a.md"]);
        assert_eq!(names(collections.get("talks").unwrap()), vec!["c.md"]);
    }

    #[test]
    fn test_group_count_and_navigation() {
        let source: Vec<FileRecord> = (0..7)
            .map(|i| post(&format!("p{i}.md"), "T", "01-01-2023"))
            .collect();
        let pages = paginate_groups(&source, &groups("/blog", 2));

        assert_eq!(pages.len(), 4);
        let paths: Vec<&str> = pages.iter().map(|p| p.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["/blog", "/blog/1", "/blog/2", "/blog/3"]);
        assert_eq!(pages[3].items.len(), 1);

        let first = &pages[0].navigation;
        assert_eq!(first.previous, None);
        assert_eq!(first.first, None);
        assert_eq!(first.next.as_deref(), Some("/blog/1"));
        assert_eq!(first.last.as_deref(), Some("/blog/3"));

        let middle = &pages[2].navigation;
        assert_eq!(middle.next.as_deref(), Some("/blog/3"));
        assert_eq!(middle.previous.as_deref(), Some("/blog/1"));
        assert_eq!(middle.first.as_deref(), Some("/blog"));
        assert_eq!(middle.last.as_deref(), Some("/blog/3"));

        let second = &pages[1].navigation;
        assert_eq!(second.previous.as_deref(), Some("/blog"));

        let last = &pages[3].navigation;
        assert_eq!(last.next, None);
        assert_eq!(last.last, None);
        assert_eq!(last.previous.as_deref(), Some("/blog/2"));

        let data = &pages[2].navigation_data;
        assert_eq!(data.next.as_ref().unwrap().path, "/blog/3");
        assert_eq!(data.next.as_ref().unwrap().items.len(), 1);
        assert_eq!(data.previous.as_ref().unwrap().index, 1);
        assert!(pages[0].navigation_data.previous.is_none());
    }

    #[test]
    fn test_hrefs_sort_as_strings() {
        let source: Vec<FileRecord> = (0..11)
            .map(|i| post(&format!("p{i}.md"), "T", "01-01-2023"))
            .collect();
        let pages = paginate_groups(&source, &groups("/blog", 1));

        assert_eq!(pages.len(), 11);
        assert_eq!(
            pages[0].hrefs[..4],
            ["/blog", "/blog/1", "/blog/10", "/blog/2"]
        );
        assert!(pages.iter().all(|p| p.hrefs == pages[0].hrefs));
    }

    #[test]
    fn test_single_and_empty_groups() {
        let source = vec![post("a.md", "A", "01-01-2023")];
        let pages = paginate_groups(&source, &groups("/blog/", 5));
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].relative_path, "/blog");
        assert!(pages[0].navigation.is_empty());

        assert!(paginate_groups(&[], &groups("/blog", 5)).is_empty());
        assert!(paginate_groups(&source, &groups("/blog", 0)).is_empty());
    }

    #[test]
    fn test_sort_by_date_newest_and_oldest() {
        let mut records = vec![
            post("mid.md", "Mid", "06-01-2023"),
            post("bad.md", "Bad", "someday"),
            post("old.md", "Old", "01-01-2022"),
            post("new.md", "New", "12-31-2023"),
        ];
        let mut newest = SortSpec::default();
        sort_records(&mut records, &newest);
        assert_eq!(names(&records), vec!["new.md", "mid.md", "old.md", "bad.md"]);
        assert!(records[3].parsed_date.is_none());

        newest.order = Some("oldest".to_string());
        sort_records(&mut records, &newest);
        assert_eq!(names(&records), vec!["old.md", "mid.md", "new.md", "bad.md"]);
    }

    #[test]
    fn test_unknown_date_format_keeps_order() {
        let mut records = vec![post("b.md", "B", "2023"), post("a.md", "A", "2022")];
        let sort = SortSpec {
            format: Some("julian".to_string()),
            ..Default::default()
        };
        sort_records(&mut records, &sort);
        assert_eq!(names(&records), vec!["b.md", "a.md"]);
        assert!(records.iter().all(|r| r.parsed_date.is_none()));
    }

    #[test]
    fn test_sort_by_title() {
        let mut records = vec![
            post("z.md", "zebra", "x"),
            post("e.md", "Éclair", "x"),
            post("a.md", "apple", "x"),
        ];
        let sort = SortSpec {
            by: Some("title".to_string()),
            ..Default::default()
        };
        sort_records(&mut records, &sort);
        assert_eq!(names(&records), vec!["a.md", "e.md", "z.md"]);
    }

    #[test]
    fn test_merge_back_replaces_and_appends() {
        let files = vec![
            FileRecord::synthetic("a", "a"),
            FileRecord::synthetic("b", "b"),
        ];
        let output = vec![
            FileRecord::synthetic("b", "rewritten"),
            FileRecord::synthetic("c", "c"),
        ];
        let merged = merge_back(files, output);

        assert_eq!(names(&merged), vec!["a", "b", "c"]);
        assert_eq!(merged[1].relative_path, "rewritten");
    }

    #[test]
    fn test_merge_back_replaces_every_record_with_the_name() {
        let files = vec![
            FileRecord::synthetic("index.md", "index.md"),
            FileRecord::synthetic("about.md", "about.md"),
            FileRecord::synthetic("index.md", "docs/index.md"),
        ];
        let output = vec![FileRecord::synthetic("index.md", "home")];
        let merged = merge_back(files, output);

        assert_eq!(names(&merged), vec!["index.md", "about.md", "index.md"]);
        assert_eq!(merged[0].relative_path, "home");
        assert_eq!(merged[2].relative_path, "home");
        assert_eq!(merged[1].relative_path, "about.md");
    }

    #[test]
    fn test_merge_back_union_on_disjoint_names() {
        let base = vec![FileRecord::synthetic("index.md", "index.md")];
        let first = vec![FileRecord::synthetic("/a", "/a"), FileRecord::synthetic("/a/1", "/a/1")];
        let second = vec![FileRecord::synthetic("/b", "/b")];

        let merged = merge_back(merge_back(base, first), second);
        assert_eq!(names(&merged), vec!["index.md", "/a", "/a/1", "/b"]);
    }

    #[test]
    fn test_paginate_rule_rewrites_paths_and_defaults() {
        let mut with_layout = post("one.md", "First Post", "01-01-2023");
        with_layout.layout = Some("_includes/custom.tera".to_string());
        with_layout.state = Some(PublishState::Draft);
        let plain = post("two.md", "Second Post", "01-02-2023");
        let settings = Settings {
            collect: vec![CollectionRule {
                collection: "posts".to_string(),
                step: ActionSpec {
                    action: Some("paginate".to_string()),
                    path: "/posts/".to_string(),
                    slug: Some("title".to_string()),
                    state: Some(PublishState::Publish),
                    layout: Some("_includes/post.tera".to_string()),
                    ..Default::default()
                },
                actions: Vec::new(),
            }],
            ..Settings::default()
        };

        let state = build_collections(&settings, vec![with_layout, plain]);

        assert_eq!(names(&state.files), vec!["one.md", "two.md"]);
        let one = &state.files[0];
        assert_eq!(one.relative_path, "/posts/first-post");
        assert_eq!(one.layout.as_deref(), Some("_includes/custom.tera"));
        assert_eq!(one.state, Some(PublishState::Draft));
        let two = &state.files[1];
        assert_eq!(two.relative_path, "/posts/second-post");
        assert_eq!(two.layout.as_deref(), Some("_includes/post.tera"));
        assert_eq!(two.state, Some(PublishState::Publish));

        // The collection sees the rewritten records too.
        assert_eq!(
            state.collections.get("posts").unwrap()[1].relative_path,
            "/posts/second-post"
        );
    }

    #[test]
    fn test_rules_run_in_order_and_bad_actions_are_skipped() {
        let files = vec![
            post("a.md", "A", "01-01-2023"),
            post("b.md", "B", "01-02-2023"),
            post("c.md", "C", "01-03-2023"),
        ];
        let rules = vec![
            CollectionRule {
                collection: "posts".to_string(),
                step: ActionSpec {
                    action: Some("organize".to_string()),
                    ..Default::default()
                },
                actions: Vec::new(),
            },
            CollectionRule {
                collection: "missing".to_string(),
                step: groups("/nowhere", 2),
                actions: Vec::new(),
            },
            CollectionRule {
                collection: "posts".to_string(),
                step: ActionSpec::default(),
                actions: vec![
                    ActionSpec {
                        action: Some("paginate".to_string()),
                        path: "/posts".to_string(),
                        slug: Some("title".to_string()),
                        ..Default::default()
                    },
                    ActionSpec {
                        sort: Some(SortSpec::default()),
                        ..groups("/blog", 2)
                    },
                ],
            },
        ];
        let settings = Settings {
            collect: rules,
            ..Settings::default()
        };

        let state = build_collections(&settings, files);

        assert_eq!(names(&state.files), vec!["a.md", "b.md", "c.md", "/blog", "/blog/1"]);
        let listing = &state.files[3];
        assert!(listing.is_page());
        // Sorted newest first; items carry the slugged paths from the earlier action.
        assert_eq!(names(&listing.items), vec!["c.md", "b.md"]);
        assert_eq!(listing.items[0].relative_path, "/posts/c");
    }
}
