use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::models::{ModelTier, TaskType};

/// Immutable runtime configuration. Loaded once at process start (optional
/// TOML file, then environment overrides), validated strictly, and passed
/// explicitly into each component constructor. Invalid values fail startup
/// rather than being clamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_flash_model")]
    pub flash_model: String,
    #[serde(default = "default_pro_model")]
    pub pro_model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_cli_program")]
    pub cli_program: String,
    #[serde(default)]
    pub force_tier: Option<ModelTier>,
    /// Root of the permitted file tree. Paths resolving outside it are
    /// rejected as traversal. Defaults to the working directory at load.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    #[serde(default = "default_quick_query_timeout")]
    pub quick_query_timeout_secs: u64,
    #[serde(default = "default_analyze_timeout")]
    pub analyze_timeout_secs: u64,
    #[serde(default = "default_codebase_timeout")]
    pub codebase_timeout_secs: u64,
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,

    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_file_lines")]
    pub max_file_lines: usize,
    #[serde(default = "default_max_prompt_bytes")]
    pub max_prompt_bytes: usize,
    #[serde(default = "default_max_query_bytes")]
    pub max_query_bytes: usize,
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

fn default_flash_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_pro_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

fn default_cli_program() -> String {
    "gemini".to_string()
}

fn default_quick_query_timeout() -> u64 {
    60
}

fn default_analyze_timeout() -> u64 {
    180
}

fn default_codebase_timeout() -> u64 {
    300
}

fn default_progress_interval() -> u64 {
    15
}

fn default_max_file_bytes() -> u64 {
    81_920
}

fn default_max_file_lines() -> usize {
    800
}

fn default_max_prompt_bytes() -> usize {
    1_000_000
}

fn default_max_query_bytes() -> usize {
    10_000
}

fn default_max_context_bytes() -> usize {
    50_000
}

fn default_max_response_bytes() -> usize {
    1_000_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flash_model: default_flash_model(),
            pro_model: default_pro_model(),
            api_key: None,
            api_base_url: default_api_base_url(),
            cli_program: default_cli_program(),
            force_tier: None,
            workspace_root: None,
            quick_query_timeout_secs: default_quick_query_timeout(),
            analyze_timeout_secs: default_analyze_timeout(),
            codebase_timeout_secs: default_codebase_timeout(),
            progress_interval_secs: default_progress_interval(),
            max_file_bytes: default_max_file_bytes(),
            max_file_lines: default_max_file_lines(),
            max_prompt_bytes: default_max_prompt_bytes(),
            max_query_bytes: default_max_query_bytes(),
            max_context_bytes: default_max_context_bytes(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

impl Config {
    /// Loads the optional config file, applies environment overrides, and
    /// validates. Any failure here is fatal to startup.
    pub async fn load() -> Result<Self> {
        let mut config = Self::load_file().await?;
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    async fn load_file() -> Result<Self> {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(Self::default());
        };

        let config_path = config_dir.join("gemgate").join("config.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config at {}", config_path.display()))?;
        Ok(config)
    }

    /// Applies environment-style overrides through an injected lookup, so
    /// tests can drive it without touching the process environment.
    pub fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = clean(get("GEMINI_FLASH_MODEL")) {
            self.flash_model = v;
        }
        if let Some(v) = clean(get("GEMINI_PRO_MODEL")) {
            self.pro_model = v;
        }
        if let Some(v) = clean(get("GOOGLE_API_KEY")) {
            self.api_key = Some(v);
        }
        if let Some(v) = clean(get("GEMGATE_API_BASE_URL")) {
            self.api_base_url = v;
        }
        if let Some(v) = clean(get("GEMGATE_CLI_PROGRAM")) {
            self.cli_program = v;
        }
        if let Some(v) = clean(get("GEMGATE_FORCE_TIER")) {
            let tier = v
                .parse::<ModelTier>()
                .map_err(|e| anyhow::anyhow!("GEMGATE_FORCE_TIER: {}", e))?;
            self.force_tier = Some(tier);
        }
        if let Some(v) = clean(get("GEMGATE_WORKSPACE_ROOT")) {
            self.workspace_root = Some(PathBuf::from(v));
        }

        parse_positive(&get, "GEMGATE_QUICK_QUERY_TIMEOUT", &mut self.quick_query_timeout_secs)?;
        parse_positive(&get, "GEMGATE_ANALYZE_TIMEOUT", &mut self.analyze_timeout_secs)?;
        parse_positive(&get, "GEMGATE_CODEBASE_TIMEOUT", &mut self.codebase_timeout_secs)?;
        parse_positive(&get, "GEMGATE_PROGRESS_INTERVAL", &mut self.progress_interval_secs)?;
        parse_positive(&get, "GEMGATE_MAX_FILE_BYTES", &mut self.max_file_bytes)?;

        let mut lines = self.max_file_lines as u64;
        parse_positive(&get, "GEMGATE_MAX_FILE_LINES", &mut lines)?;
        self.max_file_lines = lines as usize;

        let mut prompt = self.max_prompt_bytes as u64;
        parse_positive(&get, "GEMGATE_MAX_PROMPT_BYTES", &mut prompt)?;
        self.max_prompt_bytes = prompt as usize;

        let mut query = self.max_query_bytes as u64;
        parse_positive(&get, "GEMGATE_MAX_QUERY_BYTES", &mut query)?;
        self.max_query_bytes = query as usize;

        let mut context = self.max_context_bytes as u64;
        parse_positive(&get, "GEMGATE_MAX_CONTEXT_BYTES", &mut context)?;
        self.max_context_bytes = context as usize;

        let mut response = self.max_response_bytes as u64;
        parse_positive(&get, "GEMGATE_MAX_RESPONSE_BYTES", &mut response)?;
        self.max_response_bytes = response as usize;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("quick_query_timeout_secs", self.quick_query_timeout_secs),
            ("analyze_timeout_secs", self.analyze_timeout_secs),
            ("codebase_timeout_secs", self.codebase_timeout_secs),
            ("progress_interval_secs", self.progress_interval_secs),
            ("max_file_bytes", self.max_file_bytes),
            ("max_file_lines", self.max_file_lines as u64),
            ("max_prompt_bytes", self.max_prompt_bytes as u64),
            ("max_query_bytes", self.max_query_bytes as u64),
            ("max_context_bytes", self.max_context_bytes as u64),
            ("max_response_bytes", self.max_response_bytes as u64),
        ] {
            if value == 0 {
                bail!("{} must be a positive integer", name);
            }
        }

        for (name, value) in [
            ("flash_model", &self.flash_model),
            ("pro_model", &self.pro_model),
        ] {
            if !is_valid_model_name(value) {
                bail!(
                    "{} must be non-empty and contain only alphanumerics, '.' and '-'",
                    name
                );
            }
        }

        if self.cli_program.trim().is_empty() {
            bail!("cli_program must be non-empty");
        }
        if self.api_base_url.trim().is_empty() {
            bail!("api_base_url must be non-empty");
        }

        Ok(())
    }

    pub fn timeout_for(&self, task_type: TaskType) -> Duration {
        let secs = match task_type {
            TaskType::QuickQuery => self.quick_query_timeout_secs,
            TaskType::AnalyzeCode => self.analyze_timeout_secs,
            TaskType::CodebaseAnalysis => self.codebase_timeout_secs,
        };
        Duration::from_secs(secs)
    }

    /// Root of the permitted tree, falling back to the working directory.
    pub fn effective_root(&self) -> Result<PathBuf> {
        match &self.workspace_root {
            Some(root) => Ok(root.clone()),
            None => std::env::current_dir().context("Could not determine working directory"),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .map(|k| k.trim().len() >= 10)
            .unwrap_or(false)
    }
}

fn is_valid_model_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

fn parse_positive(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut u64,
) -> Result<()> {
    let Some(raw) = clean(get(key)) else {
        return Ok(());
    };
    let value: u64 = raw
        .parse()
        .with_context(|| format!("{} must be a positive integer, got `{}`", key, raw))?;
    if value == 0 {
        bail!("{} must be a positive integer, got 0", key);
    }
    *slot = value;
    Ok(())
}

fn clean(input: Option<String>) -> Option<String> {
    input.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
