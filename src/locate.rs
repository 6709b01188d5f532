//! Text location mapping: where on the page did each extracted value come from?
//!
//! Takes the markdown channel's field object and the task's cached OCR parse,
//! and for every top-level field looks for the first text block whose text
//! contains the field's value. The block's normalized box is reported so the
//! review UI can highlight it.
//!
//! # Matching rules
//!
//! - Values are compared by their string form: strings as-is, anything else
//!   as compact JSON (`100`, `true`, `["a","b"]`).
//! - Blocks are scanned in page order, then block order. The first block with
//!   non-empty text, a bounding box, and a substring match wins; later
//!   (possibly better) matches are not considered.
//! - Fields whose value is empty, or never occurs, are left out entirely.
//! - Boxes are passed through exactly as the provider reported them.
//!
//! The result is written to `extract_results/{task_id}/op.json`, replacing
//! any previous run.

use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::channel::Channel;
use crate::config::{Config, PathsConfig};
use crate::error::HarnessResult;
use crate::models::{ParseResult, TextLocationResult};
use crate::parse_cache::load_task_parse;
use crate::storage::{read_json, write_json, INDENT_4};

/// File name of the persisted location result inside a task's results directory.
pub const LOCATION_FILE: &str = "op.json";

/// Matches every top-level field of `fields` against the parsed pages.
pub fn locate_fields(parse: &ParseResult, fields: &Map<String, Value>) -> TextLocationResult {
    let mut result = TextLocationResult::default();

    for (field, value) in fields {
        let needle = value_text(value);
        if needle.is_empty() {
            continue;
        }

        let hit = parse
            .blocks()
            .filter(|block| !block.text.is_empty())
            .find_map(|block| match block.norm_box {
                Some(norm_box) if block.text.contains(needle.as_str()) => Some(norm_box),
                _ => None,
            });

        if let Some(norm_box) = hit {
            result.record(field, norm_box);
        }
    }

    result
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Runs location mapping for whole tasks, reading and writing the task's files.
pub struct TextLocator {
    paths: PathsConfig,
}

impl TextLocator {
    /// Creates a locator over the configured storage roots.
    pub fn new(config: &Config) -> Self {
        Self {
            paths: config.paths.clone(),
        }
    }

    /// Location of the task's `op.json`.
    pub fn output_path(&self, task_id: &str) -> PathBuf {
        self.paths
            .task_extract_results(task_id)
            .join(LOCATION_FILE)
    }

    /// Maps the markdown channel's fields onto the task's parsed pages.
    ///
    /// Returns `Ok(None)` when the task has no cached parse or no markdown
    /// channel result, and also when the channel result is not a JSON object.
    pub fn map_locations(&self, task_id: &str) -> HarnessResult<Option<TextLocationResult>> {
        let _span = tracing::info_span!("map_locations", task_id).entered();

        let parse = match load_task_parse(&self.paths, task_id)? {
            Some(parse) => parse,
            None => {
                tracing::info!("no parse result for task, skipping location mapping");
                return Ok(None);
            }
        };

        let channel_path = self
            .paths
            .task_extract_results(task_id)
            .join(Channel::Markdown.result_file_name());
        if !channel_path.is_file() {
            tracing::info!(path = %channel_path.display(), "markdown channel result missing");
            return Ok(None);
        }

        let fields = match read_json::<Value>(&channel_path)? {
            Value::Object(fields) => fields,
            other => {
                tracing::warn!(kind = %json_kind(&other), "markdown channel result is not an object");
                return Ok(None);
            }
        };

        let result = locate_fields(&parse, &fields);
        write_json(&self.output_path(task_id), &result, INDENT_4)?;

        tracing::info!(
            fields = fields.len(),
            located = result.on_the_page.len(),
            "location mapping saved"
        );
        Ok(Some(result))
    }

    /// Reads the last persisted location result, if any.
    pub fn load(&self, task_id: &str) -> HarnessResult<Option<TextLocationResult>> {
        let path = self.output_path(task_id);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(read_json(&path)?))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
