//! Merges a task's channel results and location data for the review UI.

use serde_json::{Map, Value};
use std::path::Path;

use crate::config::Config;
use crate::locate::LOCATION_FILE;
use crate::models::{ChannelEntry, MultiChannelResults, TextLocationResult};
use crate::storage::{list_json_files, read_json};

/// Collects every channel result of `task_id` into one response.
///
/// Channels appear in file name order and are labelled through
/// `[channels] labels`, falling back to the file stem. The first channel's
/// data becomes the default decision. This never fails: unreadable files
/// are logged and skipped, and a task without results yields an empty
/// response.
pub fn collect_results(config: &Config, task_id: &str) -> MultiChannelResults {
    let dir = config.paths.task_extract_results(task_id);
    let files = match list_json_files(&dir) {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(task_id, error = %e, "cannot list channel results");
            Vec::new()
        }
    };

    let mut response = MultiChannelResults::default();

    for path in &files {
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        if path.file_name().is_some_and(|n| n == LOCATION_FILE) {
            continue;
        }

        let data: Value = match read_json(path) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable channel result");
                continue;
            }
        };

        let channel = config
            .channels
            .labels
            .get(&stem)
            .cloned()
            .unwrap_or(stem);
        response.channels.push(ChannelEntry { channel, data });
    }

    if let Some(locations) = read_locations(&dir.join(LOCATION_FILE)) {
        response.on_the_page = locations.on_the_page;
        response.norm_box = locations.norm_box;
    }

    response.default_decision = response
        .channels
        .first()
        .map(|entry| entry.data.clone())
        .unwrap_or_else(|| Value::Object(Map::new()));

    response
}

fn read_locations(path: &Path) -> Option<TextLocationResult> {
    if !path.is_file() {
        return None;
    }
    match read_json(path) {
        Ok(locations) => Some(locations),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable location result");
            None
        }
    }
}
