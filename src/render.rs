//! # Text Rendering
//!
//! Turns a `Record` into the text that gets embedded.
//!
//! ## Key Components
//!
//! - `TextRenderer`: the seam the scheduler renders through
//! - `PropertyRenderer`: default renderer concatenating class name and string properties
//!
//! A renderer returning `None` means "nothing to embed": the scheduler treats
//! the record as skipped rather than failed.

use serde_json::Value;

use crate::record::{ClassConfig, Record};

/// Produces the text to embed for a record
pub trait TextRenderer: Send + Sync {
    /// Render `record` using `config`, or `None` when there is nothing to embed
    fn render(&self, record: &Record, config: &ClassConfig) -> Option<String>;
}

impl<F> TextRenderer for F
where
    F: Fn(&Record, &ClassConfig) -> Option<String> + Send + Sync,
{
    fn render(&self, record: &Record, config: &ClassConfig) -> Option<String> {
        self(record, config)
    }
}

/// Concatenates the class name and string properties of a record
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyRenderer;

impl TextRenderer for PropertyRenderer {
    fn render(&self, record: &Record, config: &ClassConfig) -> Option<String> {
        let mut parts = Vec::new();

        if config.vectorize_class_name && !record.class.is_empty() {
            parts.push(split_camel_case(&record.class));
        }

        // serde_json's Map iterates in key order
        for (name, value) in &record.properties {
            if !config.includes(name) {
                continue;
            }
            let Some(text) = property_text(value) else {
                continue;
            };
            if config.vectorize_property_name {
                parts.push(format!("{} {}", split_camel_case(name), text));
            } else {
                parts.push(text);
            }
        }

        let text = parts.join(" ");
        if text.trim().is_empty() {
            return None;
        }
        Some(if config.lowercase {
            text.to_lowercase()
        } else {
            text
        })
    }
}

/// String and string-array values are rendered; everything else is ignored
fn property_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let strings: Vec<&str> = items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .collect();
            (!strings.is_empty()).then(|| strings.join(" "))
        }
        _ => None,
    }
}

/// `PublishedArticle` -> `published article`
fn split_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        out.extend(c.to_lowercase());
    }
    out
}
