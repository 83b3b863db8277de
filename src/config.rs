use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::params::{self, Dimensions, Lora};

/// Environment variable consulted when the fal API key is not in the config file.
pub const FAL_KEY_ENV: &str = "FAL_KEY";
/// Environment variable consulted when the Groq API key is not in the config file.
pub const GROQ_KEY_ENV: &str = "GROQ_API_KEY";

/// Top-level configuration for flux-forge.
///
/// Holds provider credentials, generation defaults and output behavior.
/// This is the one place API keys live; nothing else in the crate reads them
/// from ambient state.
///
/// # Loading
///
/// ```rust,no_run
/// use flux_forge::config::Config;
///
/// // From a JSON file
/// let mut config = Config::load(Some("config.json".as_ref())).unwrap();
/// // Fill in keys from FAL_KEY / GROQ_API_KEY when the file leaves them empty
/// config.apply_env();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.providers.fal.api_key = "fal-...".into();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hosted provider settings.
    pub providers: Providers,
    /// Defaults used when the CLI does not override them.
    pub defaults: GenerationDefaults,
    /// Output behavior (directory, dry run, backups).
    pub output: OutputConfig,
}

/// Configuration for both hosted providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Providers {
    pub fal: FalConfig,
    pub groq: GroqConfig,
}

/// fal.ai image generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FalConfig {
    pub api_key: String,
    /// Model endpoint, e.g. `fal-ai/flux-general`.
    pub model: String,
    /// How often to poll the request queue.
    pub poll_interval_ms: u64,
    /// Give up waiting for a queued request after this long.
    pub timeout_secs: u64,
}

/// Groq chat-completion settings used for prompt enhancement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroqConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
}

/// Generation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    pub dimensions: Dimensions,
    pub num_images: u32,
    /// LoRA adapters applied when none are given on the command line.
    pub loras: Vec<Lora>,
}

/// Output and behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory generated images are written to.
    pub dir: PathBuf,
    /// If `true`, call the providers but write no files.
    pub dry_run: bool,
    /// If `true`, create a `.bak` backup before modifying a file in place.
    pub backup_originals: bool,
}

impl Default for FalConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "fal-ai/flux-general".to_string(),
            poll_interval_ms: 1000,
            timeout_secs: 300,
        }
    }
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "llama-3.1-8b-instant".to_string(),
            temperature: 0.5,
        }
    }
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            dimensions: Dimensions::default(),
            num_images: 1,
            loras: params::default_loras(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            dry_run: false,
            backup_originals: true,
        }
    }
}

impl Config {
    /// Resolve the config file path (same directory as the executable).
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", config_path.display()))?;
        log::debug!("Loaded config from {}", config_path.display());
        Ok(config)
    }

    /// Check values serde cannot: default LoRA scales and image count.
    ///
    /// API keys are not checked here; they may still come from
    /// [`apply_env`](Self::apply_env), and each command checks the key it needs.
    pub fn validate(&self) -> Result<()> {
        for lora in &self.defaults.loras {
            lora.validate().context("Invalid default LoRA")?;
        }
        if self.defaults.num_images == 0 {
            anyhow::bail!("defaults.num_images must be at least 1");
        }
        if self.defaults.dimensions.width == 0 || self.defaults.dimensions.height == 0 {
            anyhow::bail!("defaults.dimensions must be non-zero");
        }
        Ok(())
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Fill empty API keys from `FAL_KEY` / `GROQ_API_KEY`.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.providers.fal.api_key.is_empty() {
            if let Some(key) = lookup(FAL_KEY_ENV).filter(|k| !k.is_empty()) {
                log::debug!("Using fal API key from {FAL_KEY_ENV}");
                self.providers.fal.api_key = key;
            }
        }
        if self.providers.groq.api_key.is_empty() {
            if let Some(key) = lookup(GROQ_KEY_ENV).filter(|k| !k.is_empty()) {
                log::debug!("Using Groq API key from {GROQ_KEY_ENV}");
                self.providers.groq.api_key = key;
            }
        }
    }
}
