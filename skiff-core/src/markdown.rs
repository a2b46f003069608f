use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd, html};
use serde_json::{Map, Value};
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;
use thiserror::Error;

// Initialize syntax highlighting resources once
static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

const HIGHLIGHT_THEME: &str = "base16-ocean.dark";

/// Data keys ending in this suffix hold markdown to render.
pub const MARKDOWN_KEY_SUFFIX: &str = "_md";

#[derive(Debug, Error)]
pub enum FrontMatterError {
    #[error("YAML front matter error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("front matter must be a mapping")]
    NotAMapping,
}

/// Render markdown to HTML, highlighting fenced code blocks.
pub fn render_markdown(content: &str) -> String {
    let parser = Parser::new_ext(content, Options::all());

    let events: Vec<Event> = parser.collect();
    let mut processed_events = Vec::new();
    let mut i = 0;

    while i < events.len() {
        match &events[i] {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang))) => {
                let mut code_content = String::new();
                i += 1;

                while i < events.len() {
                    match &events[i] {
                        Event::End(TagEnd::CodeBlock) => break,
                        Event::Text(text) => code_content.push_str(text),
                        _ => {}
                    }
                    i += 1;
                }

                processed_events.push(Event::Html(highlight(lang, &code_content).into()));
            }
            _ => {
                processed_events.push(events[i].clone());
            }
        }
        i += 1;
    }

    let mut out = String::new();
    html::push_html(&mut out, processed_events.into_iter());

    out
}

fn highlight(lang: &str, code: &str) -> String {
    let plain = || format!("<pre><code>{}</code></pre>", html_escape::encode_text(code));

    let syntax = SYNTAX_SET.find_syntax_by_token(lang).or_else(|| match lang {
        "toml" => SYNTAX_SET.find_syntax_by_name("YAML"),
        _ => None,
    });

    match (syntax, THEME_SET.themes.get(HIGHLIGHT_THEME)) {
        (Some(syntax), Some(theme)) => {
            highlighted_html_for_string(code, &SYNTAX_SET, syntax, theme).unwrap_or_else(|_| plain())
        }
        _ => plain(),
    }
}

/// Split `---` fenced YAML front matter from a document.
///
/// Returns an empty map and the whole text when there is no front matter.
pub fn split_front_matter(text: &str) -> Result<(Map<String, Value>, &str), FrontMatterError> {
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return Ok((Map::new(), text));
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Ok((parse_yaml_mapping(yaml)?, body));
        }
        offset += line.len();
    }

    // An opening fence with no closing fence is ordinary content.
    Ok((Map::new(), text))
}

fn parse_yaml_mapping(yaml: &str) -> Result<Map<String, Value>, FrontMatterError> {
    if yaml.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_yaml::from_str::<Value>(yaml)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(FrontMatterError::NotAMapping),
    }
}

/// Render markdown-flagged parts of a data payload.
///
/// String values under keys ending in [`MARKDOWN_KEY_SUFFIX`] are rendered in
/// place, and objects shaped `{ "format": "markdown", "content": "..." }` are
/// replaced by their rendered content. Everything else is walked recursively.
pub fn render_markdown_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if let Some(rendered) = markdown_block(&map) {
                return Value::String(rendered);
            }
            let rendered = map
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(text) if key.ends_with(MARKDOWN_KEY_SUFFIX) => {
                            Value::String(render_markdown(&text))
                        }
                        other => render_markdown_fields(other),
                    };
                    (key, value)
                })
                .collect();
            Value::Object(rendered)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(render_markdown_fields).collect()),
        other => other,
    }
}

fn markdown_block(map: &Map<String, Value>) -> Option<String> {
    match (map.get("format"), map.get("content")) {
        (Some(Value::String(format)), Some(Value::String(content)))
            if format.eq_ignore_ascii_case("markdown") =>
        {
            Some(render_markdown(content))
        }
        _ => None,
    }
}
