//! JSON file persistence helpers.
//!
//! Every artifact the pipeline writes is human-readable: indented, UTF-8,
//! with non-ASCII characters left unescaped. Parent directories are created
//! on demand.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::HarnessResult;

/// Indent used for channel results, schemas and decisions.
pub const INDENT_2: &[u8] = b"  ";
/// Indent used for parse results and location results.
pub const INDENT_4: &[u8] = b"    ";

/// Serializes `value` indented with `indent`, leaving non-ASCII unescaped.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T, indent: &[u8]) -> HarnessResult<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent);
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    Ok(out)
}

/// Writes `value` to `path`, replacing any previous content.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, indent: &[u8]) -> HarnessResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, to_pretty_json(value, indent)?)?;
    Ok(())
}

/// Reads and deserializes a JSON file.
///
/// # Errors
///
/// I/O errors (including a missing file) and malformed JSON.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> HarnessResult<T> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// `*.json` files directly inside `dir`, sorted by file name.
///
/// A missing directory yields an empty list.
pub fn list_json_files(dir: &Path) -> HarnessResult<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
