use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use extract_harness::aggregate::collect_results;
use extract_harness::channel::{Channel, ChannelOutcome, ChannelRunner};
use extract_harness::config::Config;
use extract_harness::error::{HarnessError, HarnessResult};
use extract_harness::locate::LOCATION_FILE;
use extract_harness::models::{NormBox, PageTextBlock, ParseResult, ParsedPage};
use extract_harness::provider::{ImageInput, OcrFileType, OcrOutcome, Provider};
use extract_harness::tasks::TaskStore;

/// In-memory provider with canned answers and call counters.
struct ScriptedProvider {
    chat_reply: Result<String, String>,
    vision_reply: Result<String, String>,
    ocr: OcrOutcome,
    chat_calls: AtomicUsize,
    vision_calls: AtomicUsize,
    ocr_calls: AtomicUsize,
    chat_prompts: Mutex<Vec<String>>,
    vision_mimes: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(chat_reply: Result<&str, &str>, vision_reply: Result<&str, &str>) -> Self {
        Self {
            chat_reply: chat_reply.map(str::to_string).map_err(str::to_string),
            vision_reply: vision_reply.map(str::to_string).map_err(str::to_string),
            ocr: OcrOutcome::Parsed {
                markdown: "Total: $100,000元".to_string(),
                pages: sample_pages(),
            },
            chat_calls: AtomicUsize::new(0),
            vision_calls: AtomicUsize::new(0),
            ocr_calls: AtomicUsize::new(0),
            chat_prompts: Mutex::new(Vec::new()),
            vision_mimes: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> (usize, usize, usize) {
        (
            self.chat_calls.load(Ordering::SeqCst),
            self.vision_calls.load(Ordering::SeqCst),
            self.ocr_calls.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        _model: &str,
        _system_prompt: &str,
        user_prompt: &str,
        _temperature: f32,
        _max_tokens: u32,
    ) -> HarnessResult<String> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.chat_prompts
            .lock()
            .unwrap()
            .push(user_prompt.to_string());
        self.chat_reply.clone().map_err(HarnessError::provider)
    }

    async fn vision_chat(
        &self,
        _model: &str,
        images: &[ImageInput],
        _prompt: &str,
        _max_tokens: u32,
    ) -> HarnessResult<String> {
        self.vision_calls.fetch_add(1, Ordering::SeqCst);
        self.vision_mimes
            .lock()
            .unwrap()
            .extend(images.iter().map(|i| i.mime_type.clone()));
        self.vision_reply.clone().map_err(HarnessError::provider)
    }

    async fn ocr_parse(&self, _bytes: &[u8], _file_type: OcrFileType) -> HarnessResult<OcrOutcome> {
        self.ocr_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.ocr.clone())
    }
}

fn sample_pages() -> ParseResult {
    ParseResult::new(vec![ParsedPage::new(vec![
        PageTextBlock::new("合同", None),
        PageTextBlock::new(
            "Total: $100,000元",
            Some(NormBox {
                x0: 0.1,
                y0: 0.2,
                x1: 0.5,
                y1: 0.25,
            }),
        ),
    ])])
}

fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {"合同金额": {"type": "string"}}
    })
}

fn setup(files: &[&str]) -> (TempDir, Config, String) {
    let tmp = TempDir::new().unwrap();
    let mut cfg = Config::minimal(tmp.path());
    cfg.extensions.allowed.push("txt".to_string());
    cfg.extensions.markdown.push("txt".to_string());

    let store = TaskStore::new(&cfg);
    let task_id = store.create_task().unwrap();
    for name in files {
        store
            .save_upload(Some(&task_id), name, b"document bytes")
            .unwrap();
    }
    (tmp, cfg, task_id)
}

#[tokio::test]
async fn markdown_channel_saves_result_and_locations() {
    let (_tmp, cfg, task) = setup(&["contract.pdf"]);
    let provider = Arc::new(ScriptedProvider::new(
        Ok("Here you go:\n```json\n{\"合同金额\": \"100,000元\"}\n```"),
        Ok("{}"),
    ));
    let runner = ChannelRunner::new(&cfg, provider.clone());

    let report = runner
        .run_task(&task, &schema(), &[Channel::Markdown])
        .await
        .unwrap();

    assert_eq!(
        report.outcome(Channel::Markdown),
        Some(&ChannelOutcome::Completed {
            value: json!({"合同金额": "100,000元"}),
            cached: false,
        })
    );
    let locations = report.locations.unwrap();
    assert_eq!(locations.on_the_page, vec!["合同金额"]);
    assert_eq!(locations.norm_box["合同金额"], json!([[0.1, 0.2, 0.5, 0.25]]));

    let saved = std::fs::read_to_string(runner.result_path(&task, Channel::Markdown)).unwrap();
    assert_eq!(saved, "{\n  \"合同金额\": \"100,000元\"\n}");
    assert!(cfg.paths.task_extract_results(&task).join(LOCATION_FILE).is_file());
    assert!(cfg.paths.task_parse_results(&task).join("contract.md").is_file());

    let prompt = &provider.chat_prompts.lock().unwrap()[0];
    assert!(prompt.starts_with("[file name]: contract.pdf\n[file content begin]\n"));
    assert!(prompt.contains("\n[file content end]\n"));
    assert_eq!(provider.calls(), (1, 0, 1));
}

#[tokio::test]
async fn rerun_uses_existing_results_without_provider_calls() {
    let (_tmp, cfg, task) = setup(&["contract.pdf", "scan.png"]);
    let provider = Arc::new(ScriptedProvider::new(
        Ok(r#"{"合同金额": "100,000元"}"#),
        Ok(r#"{"合同金额": "99,000元"}"#),
    ));
    let runner = ChannelRunner::new(&cfg, provider.clone());
    let both = [Channel::MultiModal, Channel::Markdown];

    runner.run_task(&task, &schema(), &both).await.unwrap();
    let calls_after_first = provider.calls();
    let md_path = runner.result_path(&task, Channel::Markdown);
    let mm_path = runner.result_path(&task, Channel::MultiModal);
    let md_before = std::fs::read(&md_path).unwrap();
    let mm_before = std::fs::read(&mm_path).unwrap();

    let report = runner.run_task(&task, &schema(), &both).await.unwrap();

    assert_eq!(provider.calls(), calls_after_first);
    assert_eq!(std::fs::read(&md_path).unwrap(), md_before);
    assert_eq!(std::fs::read(&mm_path).unwrap(), mm_before);
    for channel in both {
        assert!(matches!(
            report.outcome(channel),
            Some(ChannelOutcome::Completed { cached: true, .. })
        ));
    }
    assert!(report.locations.is_some(), "locations are mapped for cached results too");
}

#[tokio::test]
async fn failing_channel_does_not_stop_the_others() {
    let (_tmp, cfg, task) = setup(&["contract.pdf"]);
    let provider = Arc::new(ScriptedProvider::new(
        Ok(r#"{"合同金额": "100,000元"}"#),
        Err("vision endpoint returned 503"),
    ));
    let runner = ChannelRunner::new(&cfg, provider);

    let report = runner
        .run_task(&task, &schema(), &[Channel::MultiModal, Channel::Markdown])
        .await
        .unwrap();

    assert!(matches!(
        report.outcome(Channel::MultiModal),
        Some(ChannelOutcome::Failed { error }) if error.contains("503")
    ));
    assert!(report.outcome(Channel::Markdown).unwrap().is_completed());
    assert!(!runner.result_path(&task, Channel::MultiModal).exists());

    let results = collect_results(&cfg, &task);
    let labels: Vec<_> = results.channels.iter().map(|c| c.channel.as_str()).collect();
    assert_eq!(labels, vec!["DeepSeek-R1"]);
    assert_eq!(results.default_decision, json!({"合同金额": "100,000元"}));
    assert_eq!(results.on_the_page, vec!["合同金额"]);
}

#[tokio::test]
async fn unparseable_answer_is_reported_and_not_saved() {
    let (_tmp, cfg, task) = setup(&["contract.pdf"]);
    let provider = Arc::new(ScriptedProvider::new(
        Ok("Sorry, I cannot read this document."),
        Ok("{}"),
    ));
    let runner = ChannelRunner::new(&cfg, provider);

    let report = runner
        .run_task(&task, &schema(), &[Channel::Markdown])
        .await
        .unwrap();

    assert_eq!(
        report.outcome(Channel::Markdown),
        Some(&ChannelOutcome::Unparsed {
            raw_text: "Sorry, I cannot read this document.".to_string()
        })
    );
    assert!(!runner.result_path(&task, Channel::Markdown).exists());
    assert!(report.locations.is_none());
}

#[tokio::test]
async fn channels_only_see_their_allowed_documents() {
    let (_tmp, cfg, task) = setup(&["notes.txt", "photo.JPG"]);
    let provider = Arc::new(ScriptedProvider::new(Ok(r#"{"a": 1}"#), Ok(r#"{"a": 2}"#)));
    let runner = ChannelRunner::new(&cfg, provider.clone());

    runner
        .run_task(&task, &schema(), &[Channel::MultiModal, Channel::Markdown])
        .await
        .unwrap();

    assert_eq!(*provider.vision_mimes.lock().unwrap(), vec!["image/jpeg"]);
    let prompt = &provider.chat_prompts.lock().unwrap()[0];
    assert!(prompt.contains("[file name]: notes.txt\n[file content begin]\ndocument bytes\n[file content end]"));
    assert!(prompt.contains("[file name]: photo.JPG"));
    assert_eq!(provider.ocr_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn channel_without_matching_documents_is_skipped() {
    let (_tmp, cfg, task) = setup(&["notes.txt"]);
    let provider = Arc::new(ScriptedProvider::new(Ok(r#"{"a": 1}"#), Ok("{}")));
    let runner = ChannelRunner::new(&cfg, provider.clone());

    let report = runner
        .run_task(&task, &schema(), &[Channel::MultiModal])
        .await
        .unwrap();

    assert_eq!(
        report.outcome(Channel::MultiModal),
        Some(&ChannelOutcome::Skipped)
    );
    assert_eq!(provider.calls(), (0, 0, 0));
}

#[tokio::test]
async fn all_channels_failing_still_aggregates() {
    let (_tmp, cfg, task) = setup(&["contract.pdf"]);
    let provider = Arc::new(ScriptedProvider::new(Err("chat down"), Err("vision down")));
    let runner = ChannelRunner::new(&cfg, provider);

    let report = runner
        .run_task(&task, &schema(), &[Channel::MultiModal, Channel::Markdown])
        .await
        .unwrap();
    assert!(report.channels.iter().all(|c| !c.outcome.is_completed()));

    let results = collect_results(&cfg, &task);
    assert!(results.channels.is_empty());
    assert!(results.on_the_page.is_empty());
    assert_eq!(results.default_decision, json!({}));
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let (_tmp, cfg, _task) = setup(&[]);
    let provider = Arc::new(ScriptedProvider::new(Ok("{}"), Ok("{}")));
    let runner = ChannelRunner::new(&cfg, provider);

    let err = runner
        .run_task("task_00000000_0", &schema(), &[Channel::Markdown])
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::NotFound(_)));
}
