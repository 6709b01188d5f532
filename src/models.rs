//! Core data models used throughout Extract Harness.
//!
//! These types describe the parsed page layout produced by the OCR provider,
//! the per-field location data derived from it, and the listing/response
//! shapes exposed to the review UI.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Normalized bounding box of a text block, in the provider's page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl NormBox {
    pub fn to_array(self) -> [f64; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }
}

/// One text block on a parsed page.
///
/// Fields the provider adds beyond `text` and `norm_box` are kept in `extra`
/// so a cached parse round-trips without loss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageTextBlock {
    /// Empty when the provider sent no text or `null`.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub norm_box: Option<NormBox>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl PageTextBlock {
    pub fn new(text: impl Into<String>, norm_box: Option<NormBox>) -> Self {
        Self {
            text: text.into(),
            norm_box,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedPage {
    #[serde(default)]
    pub textblocks: Vec<PageTextBlock>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ParsedPage {
    pub fn new(textblocks: Vec<PageTextBlock>) -> Self {
        Self {
            textblocks,
            extra: Map::new(),
        }
    }
}

/// Ordered pages of one parsed document. Serialized as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParseResult {
    pub pages: Vec<ParsedPage>,
}

impl ParseResult {
    pub fn new(pages: Vec<ParsedPage>) -> Self {
        Self { pages }
    }

    /// All text blocks in page order, then block order.
    pub fn blocks(&self) -> impl Iterator<Item = &PageTextBlock> {
        self.pages.iter().flat_map(|page| page.textblocks.iter())
    }
}

/// Where each extracted field was found on the source pages.
///
/// `on_the_page` and the keys of `norm_box` always name the same fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextLocationResult {
    #[serde(rename = "onThePage", default)]
    pub on_the_page: Vec<String>,
    #[serde(rename = "normBox", default)]
    pub norm_box: Map<String, Value>,
}

impl TextLocationResult {
    pub fn record(&mut self, field: &str, norm_box: NormBox) {
        self.on_the_page.push(field.to_string());
        self.norm_box
            .insert(field.to_string(), serde_json::json!([norm_box.to_array()]));
    }

    pub fn is_empty(&self) -> bool {
        self.on_the_page.is_empty()
    }
}

/// An uploaded document as listed for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// `{task_id}/{filename}`.
    pub id: String,
    pub filename: String,
    pub file_type: String,
    /// Modification time, unix seconds.
    pub upload_time: i64,
    pub size: u64,
}

/// One channel's output as shown to the reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub channel: String,
    pub data: Value,
}

/// Everything the review UI needs for one task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiChannelResults {
    pub channels: Vec<ChannelEntry>,
    #[serde(rename = "onThePage")]
    pub on_the_page: Vec<String>,
    #[serde(rename = "normBox")]
    pub norm_box: Map<String, Value>,
    #[serde(rename = "defaultDecision")]
    pub default_decision: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_result_keeps_unknown_provider_fields() {
        let raw = json!([
            {
                "page_id": 0,
                "textblocks": [
                    {
                        "text": "Invoice No. 42",
                        "label": "text",
                        "norm_box": {"x0": 0.1, "y0": 0.2, "x1": 0.3, "y1": 0.4}
                    }
                ]
            }
        ]);
        let parsed: ParseResult = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(parsed.pages.len(), 1);
        assert_eq!(parsed.pages[0].textblocks[0].text, "Invoice No. 42");
        assert_eq!(parsed.pages[0].extra["page_id"], json!(0));
        assert_eq!(serde_json::to_value(&parsed).unwrap(), raw);
    }

    #[test]
    fn block_without_box_or_text_deserializes() {
        let parsed: ParseResult = serde_json::from_value(json!([{"textblocks": [{}]}])).unwrap();
        let block = &parsed.pages[0].textblocks[0];
        assert!(block.text.is_empty());
        assert!(block.norm_box.is_none());
    }

    #[test]
    fn null_block_text_reads_as_empty() {
        let parsed: ParseResult =
            serde_json::from_value(json!([{"textblocks": [{"text": null}, {"text": "ok"}]}]))
                .unwrap();
        assert!(parsed.pages[0].textblocks[0].text.is_empty());
        assert_eq!(parsed.pages[0].textblocks[1].text, "ok");
    }

    #[test]
    fn location_boxes_keep_field_order() {
        let b = NormBox {
            x0: 0.0,
            y0: 0.0,
            x1: 1.0,
            y1: 1.0,
        };
        let mut result = TextLocationResult::default();
        result.record("zeta", b);
        result.record("alpha", b);
        let keys: Vec<_> = result.norm_box.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(keys, result.on_the_page);
    }

    #[test]
    fn location_result_uses_review_ui_field_names() {
        let mut result = TextLocationResult::default();
        result.record(
            "amount",
            NormBox {
                x0: 0.1,
                y0: 0.2,
                x1: 0.5,
                y1: 0.25,
            },
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({"onThePage": ["amount"], "normBox": {"amount": [[0.1, 0.2, 0.5, 0.25]]}})
        );
    }
}
