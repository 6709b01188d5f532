use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub extensions: ExtensionsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Storage roots. Relative paths are resolved against the config file's directory.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_parse_results_dir")]
    pub parse_results_dir: PathBuf,
    #[serde(default = "default_extract_results_dir")]
    pub extract_results_dir: PathBuf,
    #[serde(default = "default_schema_dir")]
    pub schema_dir: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            parse_results_dir: default_parse_results_dir(),
            extract_results_dir: default_extract_results_dir(),
            schema_dir: default_schema_dir(),
            results_dir: default_results_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_parse_results_dir() -> PathBuf {
    PathBuf::from("parse_results")
}
fn default_extract_results_dir() -> PathBuf {
    PathBuf::from("extract_results")
}
fn default_schema_dir() -> PathBuf {
    PathBuf::from("schema")
}
fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

impl PathsConfig {
    fn resolve_against(&mut self, base: &Path) {
        for dir in [
            &mut self.upload_dir,
            &mut self.parse_results_dir,
            &mut self.extract_results_dir,
            &mut self.schema_dir,
            &mut self.results_dir,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    pub fn task_uploads(&self, task_id: &str) -> PathBuf {
        self.upload_dir.join(task_id)
    }

    pub fn task_parse_results(&self, task_id: &str) -> PathBuf {
        self.parse_results_dir.join(task_id)
    }

    pub fn task_extract_results(&self, task_id: &str) -> PathBuf {
        self.extract_results_dir.join(task_id)
    }
}

/// File-extension allow-lists (lowercase, without the leading dot).
#[derive(Debug, Deserialize, Clone)]
pub struct ExtensionsConfig {
    /// Accepted on upload and considered part of a task.
    #[serde(default = "default_document_extensions")]
    pub allowed: Vec<String>,
    #[serde(default = "default_document_extensions")]
    pub markdown: Vec<String>,
    #[serde(default = "default_document_extensions")]
    pub multimodal: Vec<String>,
    /// Sent through OCR layout parsing by the markdown channel; everything
    /// else is read as text.
    #[serde(default = "default_ocr_extensions")]
    pub ocr: Vec<String>,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            allowed: default_document_extensions(),
            markdown: default_document_extensions(),
            multimodal: default_document_extensions(),
            ocr: default_ocr_extensions(),
        }
    }
}

fn default_document_extensions() -> Vec<String> {
    ["pdf", "png", "jpg", "jpeg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ocr_extensions() -> Vec<String> {
    ["pdf", "jpg", "jpeg", "png", "bmp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Returns the lowercase extension of `name`, if any.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

pub fn extension_allowed(name: &str, allow_list: &[String]) -> bool {
    match extension_of(name) {
        Some(ext) => allow_list.iter().any(|a| a.eq_ignore_ascii_case(&ext)),
        None => false,
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_vision_max_tokens")]
    pub vision_max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Endpoint of the OCR layout-parsing service.
    #[serde(default)]
    pub ocr_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            chat_model: default_chat_model(),
            vision_model: default_vision_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            vision_max_tokens: default_vision_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            ocr_url: None,
        }
    }
}

fn default_provider_kind() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://ark.cn-beijing.volces.com/api/v3".to_string()
}
fn default_api_key_env() -> String {
    "ARK_API_KEY".to_string()
}
fn default_chat_model() -> String {
    "doubao-1-5-pro-32k-250115".to_string()
}
fn default_vision_model() -> String {
    "doubao-1.5-vision-pro-32k-250115".to_string()
}
fn default_temperature() -> f32 {
    0.6
}
fn default_max_tokens() -> u32 {
    500
}
fn default_vision_max_tokens() -> u32 {
    300
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}

impl ProviderConfig {
    pub fn is_enabled(&self) -> bool {
        self.kind != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelsConfig {
    /// Strategies to run, in order.
    #[serde(default = "default_strategies")]
    pub strategies: Vec<String>,
    /// Display label per result file stem (e.g. `markdown_result`).
    #[serde(default = "default_labels")]
    pub labels: BTreeMap<String, String>,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
            labels: default_labels(),
        }
    }
}

fn default_strategies() -> Vec<String> {
    vec!["multi-modal".to_string(), "markdown".to_string()]
}

fn default_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("markdown_result".to_string(), "DeepSeek-R1".to_string()),
        ("multimodal_result".to_string(), "Doubao Vision".to_string()),
    ])
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed CORS origins; empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5050".to_string()
}

impl Config {
    /// All-defaults configuration rooted at `root`.
    pub fn minimal(root: &Path) -> Self {
        let mut paths = PathsConfig::default();
        paths.resolve_against(root);
        Self {
            paths,
            extensions: ExtensionsConfig::default(),
            provider: ProviderConfig::default(),
            channels: ChannelsConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    config.paths.resolve_against(base);

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    for strategy in &config.channels.strategies {
        match strategy.as_str() {
            "multi-modal" | "markdown" => {}
            other => anyhow::bail!(
                "Unknown extraction strategy: '{}'. Must be multi-modal or markdown.",
                other
            ),
        }
    }

    if config.extensions.allowed.is_empty() {
        anyhow::bail!("extensions.allowed must not be empty");
    }

    match config.provider.kind.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown provider kind: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.provider.is_enabled() && config.provider.max_tokens == 0 {
        anyhow::bail!("provider.max_tokens must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("xh.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn empty_file_yields_defaults_under_config_dir() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(&write_config(&tmp, "")).unwrap();
        assert_eq!(cfg.paths.upload_dir, tmp.path().join("uploads"));
        assert_eq!(
            cfg.paths.task_extract_results("t1"),
            tmp.path().join("extract_results").join("t1")
        );
        assert_eq!(cfg.channels.strategies, vec!["multi-modal", "markdown"]);
        assert!(!cfg.provider.is_enabled());
    }

    #[test]
    fn absolute_paths_are_kept() {
        let tmp = TempDir::new().unwrap();
        let abs = tmp.path().join("elsewhere");
        let body = format!("[paths]\nupload_dir = \"{}\"\n", abs.display());
        let cfg = load_config(&write_config(&tmp, &body)).unwrap();
        assert_eq!(cfg.paths.upload_dir, abs);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(&write_config(
            &tmp,
            "[channels]\nstrategies = [\"telepathy\"]\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("telepathy"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(&write_config(&tmp, "[provider]\nkind = \"magic\"\n")).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn example_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/xh.example.toml");
        let cfg = load_config(&path).unwrap();
        assert!(cfg.provider.is_enabled());
        assert!(extension_allowed("letter.docx", &cfg.extensions.markdown));
        assert!(!extension_allowed("letter.docx", &cfg.extensions.multimodal));
        assert_eq!(cfg.server.cors_origins.len(), 1);
    }

    #[test]
    fn extension_checks_ignore_case() {
        let allow = default_document_extensions();
        assert!(extension_allowed("scan.PDF", &allow));
        assert!(extension_allowed("photo.jpeg", &allow));
        assert!(!extension_allowed("notes.txt", &allow));
        assert!(!extension_allowed("README", &allow));
        assert_eq!(extension_of("a/b/c.Png").as_deref(), Some("png"));
    }
}
