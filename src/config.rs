//! TOML configuration parsing and validation.
//!
//! ```toml
//! [storage]
//! generated_dir = "./units/generated"
//! library_dir = "./units/library"
//! extension = "tsx"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//!
//! [providers.completion]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [providers.codegen]
//! base_url = "https://api.v0.dev/v1"
//! model = "v0-1.0-md"
//! api_key_env = "V0_API_KEY"
//!
//! [render]
//! chain = ["sandbox", "heuristic", "json-dump"]
//! sandbox = "isolated-document"
//! ```
//!
//! Every section is optional. [`Config::minimal`] is what an empty file
//! parses to.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use component_harness_core::models::DEFAULT_EXTENSION;
use component_harness_core::render::{Renderer, Rung};
use component_harness_core::sandbox::{default_allowed_bindings, sandbox_for_kind};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

impl Config {
    /// Defaults for commands that run without a config file.
    pub fn minimal() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_generated_dir")]
    pub generated_dir: PathBuf,
    #[serde(default = "default_library_dir")]
    pub library_dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            generated_dir: default_generated_dir(),
            library_dir: default_library_dir(),
            extension: default_extension(),
        }
    }
}

fn default_generated_dir() -> PathBuf {
    PathBuf::from("./units/generated")
}
fn default_library_dir() -> PathBuf {
    PathBuf::from("./units/library")
}
fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// The three third-party services a chat turn talks to.
#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    #[serde(default = "default_completion")]
    pub completion: ProviderConfig,
    #[serde(default = "default_codegen")]
    pub codegen: ProviderConfig,
    #[serde(default = "default_sample_data")]
    pub sample_data: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            completion: default_completion(),
            codegen: default_codegen(),
            sample_data: default_sample_data(),
        }
    }
}

/// An OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    2
}
fn default_max_tokens() -> u32 {
    2000
}

fn openai(model: &str, max_tokens: u32) -> ProviderConfig {
    ProviderConfig {
        enabled: true,
        base_url: "https://api.openai.com/v1".to_string(),
        model: model.to_string(),
        api_key_env: "OPENAI_API_KEY".to_string(),
        timeout_secs: default_timeout_secs(),
        max_retries: default_max_retries(),
        max_tokens,
        temperature: Some(0.7),
    }
}

fn default_completion() -> ProviderConfig {
    openai("gpt-4o-mini", 1000)
}
fn default_codegen() -> ProviderConfig {
    ProviderConfig {
        enabled: true,
        base_url: "https://api.v0.dev/v1".to_string(),
        model: "v0-1.0-md".to_string(),
        api_key_env: "V0_API_KEY".to_string(),
        timeout_secs: 120,
        max_retries: default_max_retries(),
        max_tokens: default_max_tokens(),
        temperature: None,
    }
}
fn default_sample_data() -> ProviderConfig {
    openai("gpt-4o-mini", 500)
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_chain")]
    pub chain: Vec<String>,
    #[serde(default = "default_sandbox")]
    pub sandbox: String,
    #[serde(default = "default_allowed_bindings")]
    pub allowed_bindings: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            chain: default_chain(),
            sandbox: default_sandbox(),
            allowed_bindings: default_allowed_bindings(),
        }
    }
}

fn default_chain() -> Vec<String> {
    vec![
        "sandbox".to_string(),
        "heuristic".to_string(),
        "json-dump".to_string(),
    ]
}
fn default_sandbox() -> String {
    "isolated-document".to_string()
}

impl RenderConfig {
    /// Parsed rungs; invalid names were rejected by [`load_config`].
    pub fn rungs(&self) -> Result<Vec<Rung>> {
        self.chain
            .iter()
            .map(|s| s.parse::<Rung>().map_err(anyhow::Error::msg))
            .collect()
    }

    /// Renderer for this chain, sandbox and binding set.
    pub fn build_renderer(&self) -> Result<Renderer> {
        let sandbox = sandbox_for_kind(&self.sandbox)
            .ok_or_else(|| anyhow::anyhow!("Unknown render.sandbox: '{}'", self.sandbox))?;
        Ok(Renderer::new(
            self.rungs()?,
            sandbox,
            self.allowed_bindings.clone(),
        ))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClassifierConfig {
    /// Lua script defining `classifier.classify(source, unit_name)`.
    #[serde(default)]
    pub script: Option<PathBuf>,
}

/// Read, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Checks shared by file-based and programmatic configs.
pub fn validate(config: &Config) -> Result<()> {
    let ext = config.storage.extension.trim();
    if ext.is_empty() || ext.contains(['.', '/', '\\']) {
        anyhow::bail!(
            "storage.extension must be a bare extension like \"tsx\", got {:?}",
            config.storage.extension
        );
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    for (name, p) in [
        ("completion", &config.providers.completion),
        ("codegen", &config.providers.codegen),
        ("sample_data", &config.providers.sample_data),
    ] {
        if p.timeout_secs == 0 {
            anyhow::bail!("providers.{}.timeout_secs must be > 0", name);
        }
        if p.enabled && p.base_url.trim().is_empty() {
            anyhow::bail!("providers.{}.base_url must not be empty", name);
        }
        if p.enabled && p.model.trim().is_empty() {
            anyhow::bail!("providers.{}.model must not be empty", name);
        }
    }

    config.render.rungs().context("Invalid render.chain")?;

    if sandbox_for_kind(&config.render.sandbox).is_none() {
        anyhow::bail!(
            "Unknown render.sandbox: '{}'. Must be isolated-document or disabled.",
            config.render.sandbox
        );
    }

    Ok(())
}
