//! Plain-text reading for documents the markdown channel does not OCR.
//!
//! Word documents are unpacked (`word/document.xml`, `<w:t>` runs); anything
//! else must already be UTF-8 text. Files that are neither are reported as
//! [`TextReadError`] and skipped by the caller.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

use crate::config::extension_of;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TextReadError {
    #[error("not a text file")]
    NotText,
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads `path` as text, unpacking DOCX containers.
pub fn read_document_text(path: &Path) -> Result<String, TextReadError> {
    let bytes = std::fs::read(path)?;
    let name = path.to_string_lossy();
    match extension_of(&name).as_deref() {
        Some("docx") => extract_docx(&bytes),
        _ => String::from_utf8(bytes).map_err(|_| TextReadError::NotText),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, TextReadError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| TextReadError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| TextReadError::Docx(e.to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| TextReadError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(TextReadError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    paragraphs_text(&xml)
}

/// Collects `<w:t>` runs, one line per `<w:p>` paragraph.
fn paragraphs_text(xml: &[u8]) -> Result<String, TextReadError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !current.is_empty() {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(TextReadError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n"))
}
