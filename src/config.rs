//! Layered configuration for the pagesmith service.
//!
//! Resolution order (later wins):
//! 1. Built-in defaults
//! 2. `pagesmith.toml` (or the file given with `--config`)
//! 3. Environment variables, including a `.env` file loaded at startup
//! 4. CLI flags
//!
//! Secrets are never read from the TOML file, only from the environment.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 5000
//!
//! [llm]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! timeout_secs = 30
//!
//! [github]
//! api_url = "https://api.github.com"
//! owner = "octocat"
//! license = "mit"
//!
//! [notify]
//! max_attempts = 4
//! base_delay_secs = 1
//! timeout_secs = 10
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::github::{DEFAULT_API_URL, is_valid_github_token};
use crate::notify::RetryPolicy;
use crate::util::redact;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "pagesmith.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: String,
    pub model: String,
    /// Fixed per-call timeout for generation requests
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitHubSection {
    pub api_url: String,
    /// Account that owns published repositories. Resolved from the token
    /// when unset.
    pub owner: Option<String>,
    /// License template key written as `LICENSE`
    pub license: String,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            owner: None,
            license: "mit".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotifySection {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    /// Per-attempt HTTP timeout
    pub timeout_secs: u64,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_secs: 1,
            timeout_secs: 10,
        }
    }
}

/// Values only ever taken from the environment.
#[derive(Clone, Default, PartialEq)]
pub struct Secrets {
    pub shared_secret: String,
    pub github_token: String,
    pub llm_api_key: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("shared_secret", &redact(&self.shared_secret))
            .field("github_token", &redact(&self.github_token))
            .field("llm_api_key", &redact(&self.llm_api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSection,
    pub llm: LlmSection,
    pub github: GitHubSection,
    pub notify: NotifySection,
    #[serde(skip)]
    pub secrets: Secrets,
}

impl Settings {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse pagesmith.toml")
    }

    /// Write the file-backed sections to `path`. Secrets are never written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Load `explicit` if given (it must exist), else `pagesmith.toml` in
    /// `dir` if present, else defaults.
    pub fn load_or_default(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let path = dir.join(DEFAULT_CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PAGESMITH_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PAGESMITH_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("PAGESMITH_PORT '{}' is not a port number", port))?;
        }
        if let Some(url) = lookup("LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("GITHUB_API_URL") {
            self.github.api_url = url;
        }
        if let Some(owner) = lookup("GITHUB_OWNER").filter(|o| !o.is_empty()) {
            self.github.owner = Some(owner);
        }

        if let Some(secret) = lookup("SHARED_SECRET") {
            self.secrets.shared_secret = secret;
        }
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.secrets.github_token = token;
        }
        if let Some(key) = lookup("LLM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.secrets.llm_api_key = key;
        }
        Ok(())
    }

    /// Fail with a descriptive error if a secret the server needs is missing.
    pub fn require_secrets(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.secrets.shared_secret.is_empty() {
            missing.push("SHARED_SECRET");
        }
        missing.extend(self.missing_client_secrets());
        report_missing(&missing)
    }

    /// Like [`Settings::require_secrets`], but only for the outbound clients.
    /// Foreground runs never authenticate a caller.
    pub fn require_client_secrets(&self) -> Result<()> {
        report_missing(&self.missing_client_secrets())
    }

    fn missing_client_secrets(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.secrets.github_token.is_empty() {
            missing.push("GITHUB_TOKEN");
        }
        if self.secrets.llm_api_key.is_empty() {
            missing.push("LLM_API_KEY");
        }
        missing
    }

    /// Non-fatal configuration problems worth logging at startup.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !self.secrets.github_token.is_empty()
            && !is_valid_github_token(&self.secrets.github_token)
        {
            warnings.push("GITHUB_TOKEN does not look like a GitHub token".to_string());
        }
        if self.llm.timeout_secs == 0 {
            warnings.push("llm.timeout_secs is 0; every generation call will time out".to_string());
        }
        if self.notify.max_attempts == 0 {
            warnings.push("notify.max_attempts is 0; one attempt will still be made".to_string());
        }
        if !(self.llm.base_url.starts_with("http://") || self.llm.base_url.starts_with("https://"))
        {
            warnings.push(format!(
                "llm.base_url '{}' is not an http(s) URL",
                self.llm.base_url
            ));
        }

        warnings
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.notify.max_attempts,
            base_delay: Duration::from_secs(self.notify.base_delay_secs),
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify.timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// TOML rendering plus redacted secrets, for `pagesmith config`.
    pub fn describe(&self) -> Result<String> {
        let mut out = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        out.push_str(&format!(
            "\n# secrets (environment only)\n# SHARED_SECRET = {}\n# GITHUB_TOKEN = {}\n# LLM_API_KEY = {}\n",
            redact(&self.secrets.shared_secret),
            redact(&self.secrets.github_token),
            redact(&self.secrets.llm_api_key),
        ));
        Ok(out)
    }
}

fn report_missing(missing: &[&str]) -> Result<()> {
    if !missing.is_empty() {
        bail!(
            "Missing required environment variables: {}",
            missing.join(", ")
        );
    }
    Ok(())
}
