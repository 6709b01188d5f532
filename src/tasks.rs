//! Tasks, uploaded documents, schemas and reviewer decisions on disk.
//!
//! ```text
//! uploads/{task_id}/{filename}          uploaded documents
//! schema/{task_id}.json                 extraction schema per task
//! results/{document_id}_decision.json   reviewer decisions
//! ```

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::config::{extension_allowed, extension_of, Config, ExtensionsConfig, PathsConfig};
use crate::error::{HarnessError, HarnessResult};
use crate::models::DocumentInfo;
use crate::provider::image_mime_type;
use crate::storage::{read_json, write_json, INDENT_2};

/// Name of the schema used when a task has none of its own.
pub const DEFAULT_SCHEMA_NAME: &str = "default";

/// New task id of the form `task_{8 hex}_{unix seconds}`.
pub fn generate_task_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("task_{}_{}", &hex[..8], Utc::now().timestamp())
}

/// Reduces an uploaded file name to a safe single path component.
///
/// Directory parts are dropped, whitespace becomes `_`, and anything other
/// than letters, digits, `_`, `-` and `.` is removed. Leading and trailing
/// dots and underscores are stripped, so the result can never be `..`.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    cleaned.trim_matches(['.', '_']).to_string()
}

/// Rejects ids that could escape the storage roots.
pub fn validate_task_id(task_id: &str) -> HarnessResult<()> {
    let ok = !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(HarnessError::InvalidInput(format!(
            "invalid task id: {:?}",
            task_id
        )))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedDocument {
    pub task_id: String,
    pub filename: String,
}

pub struct TaskStore {
    paths: PathsConfig,
    extensions: ExtensionsConfig,
}

impl TaskStore {
    pub fn new(config: &Config) -> Self {
        Self {
            paths: config.paths.clone(),
            extensions: config.extensions.clone(),
        }
    }

    /// Allocates a new task id and its empty upload directory.
    pub fn create_task(&self) -> HarnessResult<String> {
        let task_id = generate_task_id();
        std::fs::create_dir_all(self.paths.task_uploads(&task_id))?;
        tracing::info!(%task_id, "task created");
        Ok(task_id)
    }

    /// Stores an uploaded file, creating the task when `task_id` is `None`.
    pub fn save_upload(
        &self,
        task_id: Option<&str>,
        filename: &str,
        bytes: &[u8],
    ) -> HarnessResult<UploadedDocument> {
        let filename = secure_filename(filename);
        if filename.is_empty() {
            return Err(HarnessError::InvalidInput("no file name".to_string()));
        }
        if !extension_allowed(&filename, &self.extensions.allowed) {
            return Err(HarnessError::InvalidInput(format!(
                "file type not allowed: {}",
                filename
            )));
        }

        let task_id = match task_id.filter(|t| !t.is_empty()) {
            Some(id) => {
                validate_task_id(id)?;
                id.to_string()
            }
            None => generate_task_id(),
        };

        let dir = self.paths.task_uploads(&task_id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(&filename), bytes)?;
        tracing::info!(%task_id, %filename, size = bytes.len(), "document uploaded");

        Ok(UploadedDocument { task_id, filename })
    }

    /// Where an uploaded document lives. Does not check that it exists.
    pub fn document_path(&self, task_id: &str, filename: &str) -> PathBuf {
        self.paths.task_uploads(task_id).join(filename)
    }

    /// Reads back one uploaded document.
    ///
    /// # Errors
    ///
    /// [`HarnessError::InvalidInput`] if the task id or file name could point
    /// outside the task's upload directory, [`HarnessError::NotFound`] if the
    /// document does not exist.
    pub fn read_document(&self, task_id: &str, filename: &str) -> HarnessResult<Vec<u8>> {
        validate_task_id(task_id)?;
        if filename.is_empty() || secure_filename(filename) != filename {
            return Err(HarnessError::InvalidInput(format!(
                "invalid file name: {:?}",
                filename
            )));
        }

        let path = self.document_path(task_id, filename);
        if !path.is_file() {
            return Err(HarnessError::not_found(format!(
                "document {}/{}",
                task_id, filename
            )));
        }
        Ok(std::fs::read(&path)?)
    }

    /// File names of the task's documents with an allowed extension, sorted.
    pub fn document_filenames(&self, task_id: &str) -> HarnessResult<Vec<String>> {
        validate_task_id(task_id)?;
        let dir = self.paths.task_uploads(task_id);
        if !dir.is_dir() {
            return Err(HarnessError::not_found(format!("task {}", task_id)));
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if extension_allowed(&name, &self.extensions.allowed) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Lists the task's documents with type, size and upload time.
    ///
    /// # Errors
    ///
    /// [`HarnessError::NotFound`] if the task does not exist or holds no
    /// document with an allowed extension.
    pub fn list_documents(&self, task_id: &str) -> HarnessResult<Vec<DocumentInfo>> {
        let mut documents = Vec::new();
        for filename in self.document_filenames(task_id)? {
            let path = self.document_path(task_id, &filename);
            let metadata = std::fs::metadata(&path)?;
            let upload_time = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or_default();

            documents.push(DocumentInfo {
                id: format!("{}/{}", task_id, filename),
                file_type: file_type_for(&filename),
                filename,
                upload_time,
                size: metadata.len(),
            });
        }

        if documents.is_empty() {
            return Err(HarnessError::not_found(format!(
                "documents for task {}",
                task_id
            )));
        }
        Ok(documents)
    }

    fn schema_path(&self, name: &str) -> PathBuf {
        self.paths.schema_dir.join(format!("{}.json", name))
    }

    pub fn save_schema(&self, task_id: &str, schema: &Value) -> HarnessResult<()> {
        validate_task_id(task_id)?;
        if !schema.is_object() {
            return Err(HarnessError::InvalidInput(
                "schema must be a JSON object".to_string(),
            ));
        }
        write_json(&self.schema_path(task_id), schema, INDENT_2)
    }

    /// The task's schema, else the stored default schema, else a built-in one.
    pub fn load_schema(&self, task_id: &str) -> HarnessResult<Value> {
        validate_task_id(task_id)?;
        for name in [task_id, DEFAULT_SCHEMA_NAME] {
            let path = self.schema_path(name);
            if path.is_file() {
                return read_json(&path);
            }
        }
        Ok(builtin_schema())
    }

    /// Persists a reviewer's decision for one document, returning the file written.
    pub fn save_decision(&self, document_id: &str, decision: &Value) -> HarnessResult<PathBuf> {
        let stem = secure_filename(&document_id.replace('/', "_"));
        if stem.is_empty() {
            return Err(HarnessError::InvalidInput("document_id is required".to_string()));
        }
        let path = self
            .paths
            .results_dir
            .join(format!("{}_decision.json", stem));
        write_json(&path, decision, INDENT_2)?;
        Ok(path)
    }
}

/// `Content-Type` a document is served with.
pub fn content_type_for(filename: &str) -> &'static str {
    match extension_of(filename).as_deref() {
        Some("pdf") => "application/pdf",
        Some("bmp") => "image/bmp",
        Some(ext @ ("jpg" | "jpeg" | "png" | "apng" | "gif")) => image_mime_type(ext),
        Some("txt") => "text/plain; charset=utf-8",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        _ => "application/octet-stream",
    }
}

fn file_type_for(filename: &str) -> String {
    match extension_of(filename).as_deref() {
        Some("pdf") => "application/pdf".to_string(),
        Some(ext) => format!("image/{}", ext),
        None => "application/octet-stream".to_string(),
    }
}

/// Schema used when nothing has been configured.
pub fn builtin_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Document extraction schema",
        "type": "object",
        "properties": {
            "invoiceNumber": {
                "type": "string",
                "title": "Invoice number",
                "description": "Unique invoice identifier"
            },
            "invoiceDate": {
                "type": "string",
                "format": "date",
                "title": "Invoice date",
                "description": "Date the invoice was issued"
            }
        },
        "required": ["invoiceNumber", "invoiceDate"]
    })
}
