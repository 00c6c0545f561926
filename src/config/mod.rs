use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Speech-to-text API settings
    pub speech: SpeechConfig,

    /// Bilibili description export settings
    pub bilibili: BilibiliConfig,

    /// Merge defaults
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Base URL of an OpenAI-compatible transcription endpoint
    pub base_url: String,

    /// Transcription model name
    pub model: String,

    /// API key (falls back to the OPENAI_API_KEY environment variable)
    pub api_key: Option<String>,

    /// Maximum concurrent transcription jobs
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BilibiliConfig {
    /// Cookie header (e.g. containing SESSDATA) sent with API requests
    pub cookie: Option<String>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Delay between per-episode requests in milliseconds
    pub request_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Default files per merged batch document
    pub batch_size: usize,

    /// Default blank lines between batch entries
    pub blank_lines: usize,

    /// Default concurrent file reads (None = available parallelism)
    pub workers: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            speech: SpeechConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini-transcribe".to_string(),
                api_key: None,
                max_concurrent_jobs: 3,
            },
            bilibili: BilibiliConfig {
                cookie: None,
                request_timeout_secs: 20,
                request_delay_ms: 250,
            },
            merge: MergeConfig {
                batch_size: 10,
                blank_lines: 3,
                workers: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content =
                fs_err::read_to_string(&config_path).context("Failed to read config file")?;

            let config: Config =
                serde_yaml::from_str(&content).context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    fn config_path() -> Result<std::path::PathBuf> {
        // First try current directory for easy testing
        let local_config = std::path::PathBuf::from("epkit.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("episode-toolkit").join("config.yaml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        Url::parse(&self.speech.base_url)
            .with_context(|| format!("Invalid speech base_url: {}", self.speech.base_url))?;

        if self.speech.max_concurrent_jobs == 0 {
            anyhow::bail!("speech.max_concurrent_jobs must be at least 1");
        }

        if self.merge.batch_size == 0 {
            anyhow::bail!("merge.batch_size must be at least 1");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Speech base URL: {}", self.speech.base_url);
        println!("  Speech model: {}", self.speech.model);
        println!(
            "  Speech API key: {}",
            if self.speech.api_key.is_some() {
                "(set in config)"
            } else {
                "(from OPENAI_API_KEY)"
            }
        );
        println!("  Max concurrent jobs: {}", self.speech.max_concurrent_jobs);
        println!(
            "  Bilibili cookie: {}",
            if self.bilibili.cookie.is_some() { "(set)" } else { "(none)" }
        );
        println!("  Batch size: {}", self.merge.batch_size);
        println!("  Blank lines between entries: {}", self.merge.blank_lines);
    }

    /// Print the config file location for manual editing
    pub fn show_path() -> Result<()> {
        println!("Configuration file:");
        println!("  {}", Self::config_path()?.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = Config::default();
        config.merge.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let mut config = Config::default();
        config.speech.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.merge.batch_size, config.merge.batch_size);
        assert_eq!(back.speech.model, config.speech.model);
    }
}
