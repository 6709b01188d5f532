//! Extraction channels and the runner that drives them for a task.
//!
//! A channel is one extraction strategy with a stable output file:
//!
//! | Strategy | Provider path | Output |
//! |----------|---------------|--------|
//! | `multi-modal` | vision chat over the raw document images | `multimodal_result.json` |
//! | `markdown` | OCR parse (or plain text) fed to a chat model | `markdown_result.json` |
//!
//! Channels run one after another in the configured order. A failing
//! channel is logged and left out; it never stops the others. An existing
//! output file short-circuits the channel, so re-running a task does not
//! call the provider again. Once the markdown channel has a result, text
//! locations are mapped for the task.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Instrument;

use crate::config::{extension_allowed, extension_of, Config};
use crate::error::{HarnessError, HarnessResult};
use crate::extract::read_document_text;
use crate::json_extract::extract_json;
use crate::locate::TextLocator;
use crate::models::TextLocationResult;
use crate::parse_cache::{ParseCache, ParseLookup};
use crate::provider::{image_mime_type, ImageInput, Provider};
use crate::storage::{read_json, write_json, INDENT_2};
use crate::tasks::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    MultiModal,
    Markdown,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::MultiModal => "multi-modal",
            Channel::Markdown => "markdown",
        }
    }

    /// File stem of the channel's result, also the key of its display label.
    pub fn result_stem(&self) -> &'static str {
        match self {
            Channel::MultiModal => "multimodal_result",
            Channel::Markdown => "markdown_result",
        }
    }

    pub fn result_file_name(&self) -> String {
        format!("{}.json", self.result_stem())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multi-modal" => Ok(Channel::MultiModal),
            "markdown" => Ok(Channel::Markdown),
            other => Err(HarnessError::InvalidInput(format!(
                "unknown extraction strategy: {}",
                other
            ))),
        }
    }
}

/// Parses configured strategy names, keeping their order.
pub fn parse_strategies(names: &[String]) -> HarnessResult<Vec<Channel>> {
    names.iter().map(|n| n.parse()).collect()
}

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a professional document analysis assistant who extracts structured information from documents.";
const DEFAULT_USER_PROMPT: &str = "Analyse the document and extract the key information. \
Return it as JSON following this JSON Schema: {jsonSchema}";

/// Prompts for one run, taken from the schema when it carries its own.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionPrompts {
    pub system_prompt: String,
    pub user_prompt: String,
}

impl ExtractionPrompts {
    /// Reads `system_prompt` / `user_prompt` from the schema object and
    /// substitutes `{jsonSchema}` with the schema serialized as JSON.
    pub fn from_schema(schema: &Value) -> Self {
        let system_prompt = schema
            .get("system_prompt")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
            .to_string();
        let template = schema
            .get("user_prompt")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_USER_PROMPT);
        let user_prompt = template.replace("{jsonSchema}", &schema.to_string());
        Self {
            system_prompt,
            user_prompt,
        }
    }
}

/// What happened to one channel during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Completed { value: Value, cached: bool },
    /// No document in the task matched the channel's allow-list.
    Skipped,
    /// The model answered but no JSON could be recovered from it.
    Unparsed { raw_text: String },
    Failed { error: String },
}

impl ChannelOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ChannelOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelReport {
    pub channel: Channel,
    #[serde(flatten)]
    pub outcome: ChannelOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub task_id: String,
    pub channels: Vec<ChannelReport>,
    /// Locations mapped after the markdown channel, if that happened.
    pub locations: Option<TextLocationResult>,
}

impl RunReport {
    pub fn outcome(&self, channel: Channel) -> Option<&ChannelOutcome> {
        self.channels
            .iter()
            .find(|r| r.channel == channel)
            .map(|r| &r.outcome)
    }
}

pub struct ChannelRunner {
    config: Config,
    provider: Arc<dyn Provider>,
    tasks: TaskStore,
    cache: ParseCache,
    locator: TextLocator,
}

impl ChannelRunner {
    pub fn new(config: &Config, provider: Arc<dyn Provider>) -> Self {
        Self {
            config: config.clone(),
            tasks: TaskStore::new(config),
            cache: ParseCache::new(config, provider.clone()),
            locator: TextLocator::new(config),
            provider,
        }
    }

    pub fn result_path(&self, task_id: &str, channel: Channel) -> PathBuf {
        self.config
            .paths
            .task_extract_results(task_id)
            .join(channel.result_file_name())
    }

    /// Runs the configured strategies for `task_id`.
    pub async fn run_configured(&self, task_id: &str, schema: &Value) -> HarnessResult<RunReport> {
        let strategies = parse_strategies(&self.config.channels.strategies)?;
        self.run_task(task_id, schema, &strategies).await
    }

    /// Runs `strategies` in order for every document of the task.
    ///
    /// # Errors
    ///
    /// Only when the task itself cannot be read (missing task, no documents).
    /// Channel failures are reported per channel in the [`RunReport`].
    pub async fn run_task(
        &self,
        task_id: &str,
        schema: &Value,
        strategies: &[Channel],
    ) -> HarnessResult<RunReport> {
        let files = self.tasks.document_filenames(task_id)?;
        if files.is_empty() {
            return Err(HarnessError::not_found(format!(
                "documents for task {}",
                task_id
            )));
        }
        std::fs::create_dir_all(self.config.paths.task_extract_results(task_id))?;

        let prompts = ExtractionPrompts::from_schema(schema);
        let mut report = RunReport {
            task_id: task_id.to_string(),
            channels: Vec::with_capacity(strategies.len()),
            locations: None,
        };

        for &channel in strategies {
            let span = tracing::info_span!("channel", task_id, channel = channel.name());
            let result = self
                .run_channel(channel, task_id, &files, &prompts)
                .instrument(span.clone())
                .await;
            let outcome = span.in_scope(|| settle_outcome(result));

            if channel == Channel::Markdown && outcome.is_completed() {
                report.locations = span.in_scope(|| match self.locator.map_locations(task_id) {
                    Ok(locations) => locations,
                    Err(e) => {
                        tracing::warn!(error = %e, "location mapping failed");
                        None
                    }
                });
            }

            report.channels.push(ChannelReport { channel, outcome });
        }

        Ok(report)
    }

    async fn run_channel(
        &self,
        channel: Channel,
        task_id: &str,
        files: &[String],
        prompts: &ExtractionPrompts,
    ) -> HarnessResult<ChannelOutcome> {
        let save_path = self.result_path(task_id, channel);
        if save_path.is_file() {
            match read_json::<Value>(&save_path) {
                Ok(value) => {
                    tracing::info!(path = %save_path.display(), "using existing channel result");
                    return Ok(ChannelOutcome::Completed {
                        value,
                        cached: true,
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "existing channel result unreadable, regenerating")
                }
            }
        }

        let allow_list = match channel {
            Channel::MultiModal => &self.config.extensions.multimodal,
            Channel::Markdown => &self.config.extensions.markdown,
        };
        let selected: Vec<&String> = files
            .iter()
            .filter(|f| extension_allowed(f, allow_list))
            .collect();
        if selected.is_empty() {
            return Ok(ChannelOutcome::Skipped);
        }

        let raw = match channel {
            Channel::MultiModal => self.multimodal_completion(task_id, &selected, prompts).await?,
            Channel::Markdown => self.markdown_completion(task_id, &selected, prompts).await?,
        };

        match extract_json(&raw) {
            Ok(value) => {
                write_json(&save_path, &value, INDENT_2)?;
                Ok(ChannelOutcome::Completed {
                    value,
                    cached: false,
                })
            }
            Err(e) => Ok(ChannelOutcome::Unparsed {
                raw_text: e.raw_text,
            }),
        }
    }

    async fn multimodal_completion(
        &self,
        task_id: &str,
        files: &[&String],
        prompts: &ExtractionPrompts,
    ) -> HarnessResult<String> {
        let mut images = Vec::with_capacity(files.len());
        for filename in files {
            let path = self.tasks.document_path(task_id, filename);
            let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    HarnessError::not_found(format!("document {}/{}", task_id, filename))
                }
                _ => e.into(),
            })?;
            let ext = extension_of(filename).unwrap_or_default();
            images.push(ImageInput {
                bytes,
                mime_type: image_mime_type(&ext).to_string(),
            });
        }

        let provider_cfg = &self.config.provider;
        self.provider
            .vision_chat(
                &provider_cfg.vision_model,
                &images,
                &prompts.user_prompt,
                provider_cfg.vision_max_tokens,
            )
            .await
    }

    async fn markdown_completion(
        &self,
        task_id: &str,
        files: &[&String],
        prompts: &ExtractionPrompts,
    ) -> HarnessResult<String> {
        let mut sections = Vec::with_capacity(files.len());

        for filename in files {
            let content = if extension_allowed(filename, &self.config.extensions.ocr) {
                match self.cache.get_or_parse(task_id, filename).await {
                    Ok(ParseLookup::Available(pages)) => serde_json::to_string_pretty(&pages)?,
                    Ok(ParseLookup::Unavailable) => {
                        tracing::warn!(%filename, "document parse unavailable, skipping");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(%filename, error = %e, "document parse failed, skipping");
                        continue;
                    }
                }
            } else {
                match read_document_text(&self.tasks.document_path(task_id, filename)) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(%filename, error = %e, "cannot read document text, skipping");
                        continue;
                    }
                }
            };

            sections.push(file_section(filename, &content));
        }

        if sections.is_empty() {
            return Err(HarnessError::provider(
                "no document content could be prepared for the markdown channel",
            ));
        }

        let user_prompt = format!("{}\n{}", sections.join("\n"), prompts.user_prompt);
        let provider_cfg = &self.config.provider;
        self.provider
            .chat(
                &provider_cfg.chat_model,
                &prompts.system_prompt,
                &user_prompt,
                provider_cfg.temperature,
                provider_cfg.max_tokens,
            )
            .await
    }
}

/// Turns a channel's result into its reported outcome, logging it.
fn settle_outcome(result: HarnessResult<ChannelOutcome>) -> ChannelOutcome {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(error = %e, "channel failed");
            return ChannelOutcome::Failed {
                error: e.to_string(),
            };
        }
    };

    match &outcome {
        ChannelOutcome::Completed { cached, .. } => tracing::info!(cached, "channel completed"),
        ChannelOutcome::Skipped => tracing::info!("no matching documents, channel skipped"),
        ChannelOutcome::Unparsed { raw_text } => {
            tracing::warn!(raw_text = %raw_text, "model output is not JSON")
        }
        ChannelOutcome::Failed { .. } => {}
    }
    outcome
}

/// Wraps one document's content for the chat prompt.
fn file_section(filename: &str, content: &str) -> String {
    format!(
        "[file name]: {}\n[file content begin]\n{}\n[file content end]",
        filename, content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strategy_names_round_trip() {
        for channel in [Channel::MultiModal, Channel::Markdown] {
            assert_eq!(channel.name().parse::<Channel>().unwrap(), channel);
        }
        assert!("ocr".parse::<Channel>().is_err());
    }

    #[test]
    fn result_files_use_stable_names() {
        assert_eq!(Channel::Markdown.result_file_name(), "markdown_result.json");
        assert_eq!(
            Channel::MultiModal.result_file_name(),
            "multimodal_result.json"
        );
    }

    #[test]
    fn configured_order_is_kept() {
        let names = vec!["markdown".to_string(), "multi-modal".to_string()];
        assert_eq!(
            parse_strategies(&names).unwrap(),
            vec![Channel::Markdown, Channel::MultiModal]
        );
    }

    #[test]
    fn prompts_default_and_embed_schema() {
        let schema = json!({"type": "object", "properties": {"金额": {"type": "string"}}});
        let prompts = ExtractionPrompts::from_schema(&schema);
        assert_eq!(prompts.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(prompts.user_prompt.contains("\"金额\""));
        assert!(!prompts.user_prompt.contains("{jsonSchema}"));
    }

    #[test]
    fn prompts_come_from_schema_when_present() {
        let schema = json!({
            "system_prompt": "You read invoices.",
            "user_prompt": "Fill {jsonSchema} please",
        });
        let prompts = ExtractionPrompts::from_schema(&schema);
        assert_eq!(prompts.system_prompt, "You read invoices.");
        assert!(prompts.user_prompt.starts_with("Fill {"));
        assert!(prompts.user_prompt.ends_with("} please"));
    }

    #[test]
    fn file_section_layout() {
        assert_eq!(
            file_section("a.pdf", "body"),
            "[file name]: a.pdf\n[file content begin]\nbody\n[file content end]"
        );
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let report = ChannelReport {
            channel: Channel::Markdown,
            outcome: ChannelOutcome::Unparsed {
                raw_text: "oops".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"channel": "markdown", "status": "unparsed", "raw_text": "oops"})
        );
    }
}
