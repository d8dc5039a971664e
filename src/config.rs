//! Runtime configuration.
//!
//! Defaults are the product values. `from_env()` reads a `.env` file (if
//! any) and then `PEEKBOARD_*` variables, so a host can tune timeouts and
//! the endpoint without a rebuild.

use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_MAX_TOKENS: u32 = 500;
/// Attribution headers OpenRouter shows for this app.
pub const DEFAULT_HTTP_REFERER: &str = "https://github.com/peekboard/peekboard";
pub const DEFAULT_APP_TITLE: &str = "Peekboard";

const MAX_TOKENS_CEILING: u32 = 32_768;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Upper bound on waiting for the first frame of a session.
    pub frame_timeout: Duration,
    /// How often the image source is polled while waiting.
    pub poll_interval: Duration,
    /// How long an unanswered consent dialog is tolerated before the
    /// request counts as denied.
    pub consent_grace: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(16),
            consent_grace: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub jpeg_quality: u8,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisConfig {
    pub base_url: String,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    pub referer: String,
    pub title: String,
    /// Used only when the settings store has no key.
    pub fallback_api_key: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout: Duration::from_secs(60),
            referer: DEFAULT_HTTP_REFERER.to_string(),
            title: DEFAULT_APP_TITLE.to_string(),
            fallback_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub encoder: EncoderConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("{0}")]
    OutOfRange(String),
}

impl PipelineConfig {
    /// Defaults, overridden by `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            log::info!("[CONFIG] Loaded {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults, overridden by whatever `lookup` returns for each key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_u64(&lookup, "PEEKBOARD_FRAME_TIMEOUT_MS")? {
            config.capture.frame_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, "PEEKBOARD_FRAME_POLL_MS")? {
            config.capture.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, "PEEKBOARD_CONSENT_GRACE_MS")? {
            config.capture.consent_grace = Duration::from_millis(ms);
        }
        if let Some(quality) = parse_u64(&lookup, "PEEKBOARD_JPEG_QUALITY")? {
            config.encoder.jpeg_quality = u8::try_from(quality).map_err(|_| {
                ConfigError::OutOfRange(format!(
                    "PEEKBOARD_JPEG_QUALITY must be between 1 and 100, got {quality}"
                ))
            })?;
        }
        if let Some(url) = lookup("PEEKBOARD_API_BASE_URL") {
            config.analysis.base_url = url.trim().to_string();
        }
        if let Some(tokens) = parse_u64(&lookup, "PEEKBOARD_MAX_TOKENS")? {
            config.analysis.max_tokens = u32::try_from(tokens).unwrap_or(u32::MAX);
        }
        if let Some(ms) = parse_u64(&lookup, "PEEKBOARD_REQUEST_TIMEOUT_MS")? {
            config.analysis.request_timeout = Duration::from_millis(ms);
        }
        if let Some(referer) = lookup("PEEKBOARD_HTTP_REFERER") {
            config.analysis.referer = referer.trim().to_string();
        }
        if let Some(title) = lookup("PEEKBOARD_APP_TITLE") {
            config.analysis.title = title.trim().to_string();
        }
        config.analysis.fallback_api_key = lookup("OPENROUTER_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capture = &self.capture;
        if capture.frame_timeout.is_zero() {
            return Err(ConfigError::OutOfRange(
                "frame timeout must be greater than zero".to_string(),
            ));
        }
        if capture.poll_interval.is_zero() || capture.poll_interval >= capture.frame_timeout {
            return Err(ConfigError::OutOfRange(format!(
                "frame poll interval must be between 1ms and the frame timeout ({}ms), got {}ms",
                capture.frame_timeout.as_millis(),
                capture.poll_interval.as_millis()
            )));
        }
        if capture.consent_grace.is_zero() {
            return Err(ConfigError::OutOfRange(
                "consent grace period must be greater than zero".to_string(),
            ));
        }

        if !(1..=100).contains(&self.encoder.jpeg_quality) {
            return Err(ConfigError::OutOfRange(format!(
                "JPEG quality must be between 1 and 100, got {}",
                self.encoder.jpeg_quality
            )));
        }

        let analysis = &self.analysis;
        if !(analysis.base_url.starts_with("https://") || analysis.base_url.starts_with("http://"))
        {
            return Err(ConfigError::Invalid {
                key: "PEEKBOARD_API_BASE_URL",
                value: analysis.base_url.clone(),
            });
        }
        if !(1..=MAX_TOKENS_CEILING).contains(&analysis.max_tokens) {
            return Err(ConfigError::OutOfRange(format!(
                "max tokens must be between 1 and {MAX_TOKENS_CEILING}, got {}",
                analysis.max_tokens
            )));
        }
        if analysis.request_timeout.is_zero() {
            return Err(ConfigError::OutOfRange(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        // Sent as HTTP header values.
        for (key, value) in [
            ("PEEKBOARD_HTTP_REFERER", &analysis.referer),
            ("PEEKBOARD_APP_TITLE", &analysis.title),
        ] {
            if value.is_empty() || !value.chars().all(|c| c == ' ' || c.is_ascii_graphic()) {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

fn parse_u64<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
