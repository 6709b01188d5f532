//! CLI command implementations.
//!
//! Each `run_*` function backs one `xh` subcommand and prints its result to
//! stdout. Tabular output for humans, pretty JSON where the result is JSON.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::aggregate::collect_results;
use crate::channel::{parse_strategies, Channel, ChannelOutcome, ChannelRunner};
use crate::config::Config;
use crate::json_extract::extract_json;
use crate::locate::TextLocator;
use crate::provider::Provider;
use crate::storage::{to_pretty_json, INDENT_2};
use crate::tasks::TaskStore;

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let bytes = to_pretty_json(value, INDENT_2)?;
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}

pub fn run_create_task(config: &Config) -> Result<()> {
    let task_id = TaskStore::new(config).create_task()?;
    println!("{}", task_id);
    Ok(())
}

pub fn run_upload(config: &Config, task_id: &str, file: &Path) -> Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let uploaded = TaskStore::new(config).save_upload(Some(task_id), &name, &bytes)?;
    println!("Uploaded {} to {}", uploaded.filename, uploaded.task_id);
    Ok(())
}

pub fn run_documents(config: &Config, task_id: &str) -> Result<()> {
    let documents = TaskStore::new(config).list_documents(task_id)?;

    println!("{:<40} {:<18} {:>10}", "FILENAME", "TYPE", "SIZE");
    for doc in &documents {
        println!("{:<40} {:<18} {:>10}", doc.filename, doc.file_type, doc.size);
    }
    Ok(())
}

/// Runs extraction for a task and prints one line per channel.
///
/// `schema_path` overrides the task's stored schema; `strategies` overrides
/// `[channels] strategies` when non-empty.
pub async fn run_extraction(
    config: &Config,
    provider: Arc<dyn Provider>,
    task_id: &str,
    schema_path: Option<&Path>,
    strategies: &[String],
) -> Result<()> {
    let schema: Value = match schema_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read schema: {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Schema is not valid JSON: {}", path.display()))?
        }
        None => TaskStore::new(config).load_schema(task_id)?,
    };

    let strategies: Vec<Channel> = if strategies.is_empty() {
        parse_strategies(&config.channels.strategies)?
    } else {
        parse_strategies(strategies)?
    };

    let runner = ChannelRunner::new(config, provider);
    let report = runner.run_task(task_id, &schema, &strategies).await?;

    println!("{:<12} {:<10} DETAIL", "CHANNEL", "STATUS");
    for entry in &report.channels {
        let (status, detail) = match &entry.outcome {
            ChannelOutcome::Completed { cached: true, .. } => ("cached", String::new()),
            ChannelOutcome::Completed { .. } => (
                "ok",
                runner.result_path(task_id, entry.channel).display().to_string(),
            ),
            ChannelOutcome::Skipped => ("skipped", "no matching documents".to_string()),
            ChannelOutcome::Unparsed { raw_text } => ("unparsed", one_line(raw_text)),
            ChannelOutcome::Failed { error } => ("failed", error.clone()),
        };
        println!("{:<12} {:<10} {}", entry.channel.name(), status, detail);
    }
    if let Some(locations) = &report.locations {
        println!();
        println!("Located {} field(s) on the page.", locations.on_the_page.len());
    }
    Ok(())
}

pub fn run_locate(config: &Config, task_id: &str) -> Result<()> {
    match TextLocator::new(config).map_locations(task_id)? {
        Some(result) => print_json(&result),
        None => bail!(
            "no parse result or markdown channel result for task {}",
            task_id
        ),
    }
}

pub fn run_results(config: &Config, task_id: &str) -> Result<()> {
    print_json(&collect_results(config, task_id))
}

/// Recovers JSON from a saved model answer.
pub fn run_extract_json(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    match extract_json(&text) {
        Ok(value) => print_json(&value),
        Err(e) => bail!("{}: {}", e, one_line(&e.raw_text)),
    }
}

fn one_line(text: &str) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 80 {
        format!("{}...", flat.chars().take(80).collect::<String>())
    } else {
        flat
    }
}
