//! Per-document cache of OCR layout parses.
//!
//! Parsing a document through the OCR provider is slow and billed, so the
//! result is kept on disk next to a Markdown rendering:
//!
//! ```text
//! parse_results/{task_id}/{base_name}.json   pages → text blocks → norm boxes
//! parse_results/{task_id}/{base_name}.md     human-readable rendering
//! ```
//!
//! The cache key is the exact document base name. There is no locking: two
//! concurrent misses for the same document both call the provider and the
//! last write wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{extension_of, Config, PathsConfig};
use crate::error::{HarnessError, HarnessResult};
use crate::models::ParseResult;
use crate::provider::{OcrFileType, OcrOutcome, Provider};
use crate::storage::{list_json_files, read_json, write_json, INDENT_4};

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseLookup {
    Available(ParseResult),
    /// The provider answered without any parse data.
    Unavailable,
}

pub struct ParseCache {
    paths: PathsConfig,
    provider: Arc<dyn Provider>,
}

impl ParseCache {
    pub fn new(config: &Config, provider: Arc<dyn Provider>) -> Self {
        Self {
            paths: config.paths.clone(),
            provider,
        }
    }

    /// Location of the cached pages JSON for one document.
    pub fn json_path(&self, task_id: &str, filename: &str) -> PathBuf {
        self.paths
            .task_parse_results(task_id)
            .join(format!("{}.json", base_name(filename)))
    }

    pub fn markdown_path(&self, task_id: &str, filename: &str) -> PathBuf {
        self.paths
            .task_parse_results(task_id)
            .join(format!("{}.md", base_name(filename)))
    }

    /// Returns the cached parse of `filename`, calling the provider on a miss.
    ///
    /// # Errors
    ///
    /// [`HarnessError::NotFound`] if the uploaded document does not exist,
    /// [`HarnessError::Provider`] if the OCR call itself fails.
    pub async fn get_or_parse(&self, task_id: &str, filename: &str) -> HarnessResult<ParseLookup> {
        let json_path = self.json_path(task_id, filename);
        if json_path.exists() {
            tracing::info!(path = %json_path.display(), "using cached parse result");
            return Ok(ParseLookup::Available(read_json(&json_path)?));
        }

        let source = self.paths.task_uploads(task_id).join(filename);
        if !source.is_file() {
            return Err(HarnessError::not_found(format!(
                "document {}/{}",
                task_id, filename
            )));
        }

        let bytes = std::fs::read(&source)?;
        let file_type = OcrFileType::for_extension(&extension_of(filename).unwrap_or_default());

        match self.provider.ocr_parse(&bytes, file_type).await? {
            OcrOutcome::Parsed { markdown, pages } => {
                let md_path = self.markdown_path(task_id, filename);
                if let Some(parent) = md_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&md_path, markdown)?;
                write_json(&json_path, &pages, INDENT_4)?;
                tracing::info!(
                    task_id,
                    filename,
                    pages = pages.pages.len(),
                    "parse result saved"
                );
                Ok(ParseLookup::Available(pages))
            }
            OcrOutcome::NoData { raw } => {
                tracing::warn!(task_id, filename, response = %raw, "OCR parse returned no data");
                Ok(ParseLookup::Unavailable)
            }
        }
    }
}

/// The parse result that stands for a whole task.
///
/// Among all `*.json` files in the task's parse directory the first in file
/// name order is used. Returns `Ok(None)` when the task has none.
pub fn load_task_parse(paths: &PathsConfig, task_id: &str) -> HarnessResult<Option<ParseResult>> {
    let files = list_json_files(&paths.task_parse_results(task_id))?;
    match files.first() {
        Some(path) => {
            if files.len() > 1 {
                tracing::debug!(
                    task_id,
                    chosen = %path.display(),
                    candidates = files.len(),
                    "several parse results for task, using the first"
                );
            }
            Ok(Some(read_json(path)?))
        }
        None => Ok(None),
    }
}

fn base_name(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string())
}
