//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and handed to the
//! backend client and the session controller at startup.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// BackendConfig
// ---------------------------------------------------------------------------

/// Connection settings for the assistant backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend HTTP API, without a trailing slash.
    pub base_url: String,
    /// Maximum seconds to wait for any single backend call.
    ///
    /// Transcription and chat replies run model inference server-side, so
    /// this is deliberately generous.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            timeout_secs: 120,
        }
    }
}

// ---------------------------------------------------------------------------
// ChatConfig
// ---------------------------------------------------------------------------

/// Canned strings used by the session controller and the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Assistant message shown alone at the top of a fresh session.
    pub greeting: String,
    /// Assistant message appended when a chat reply cannot be obtained.
    pub apology: String,
    /// Prompt sent to the chat endpoint when a message carries only an image.
    pub attachment_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            greeting: "Hi, Annapoorna here! How may I help you?".into(),
            apology: "Sorry, something went wrong.".into(),
            attachment_prompt: "Explain".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for microphone capture and clip assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; `None` means the system default.
    pub device: Option<String>,
    /// Sample rate (Hz) of the mono WAV clip uploaded for transcription.
    pub target_sample_rate: u32,
    /// Recordings shorter than this are dropped instead of transcribed.
    pub min_recording_secs: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            target_sample_rate: 16_000,
            min_recording_secs: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// TranscriptionConfig
// ---------------------------------------------------------------------------

/// Language codes the transcription endpoint accepts.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "auto", "en", "hi", "pa", "ta", "te", "gu", "bn", "mr", "kn", "ml",
];

/// Settings forwarded with every transcription request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Spoken language as an ISO-639-1 code, or `"auto"` for server-side
    /// detection.
    pub language: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            language: "auto".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Defaults for the console driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// User whose roster is loaded on startup when none is given on the
    /// command line.
    pub user_id: Option<String>,
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use annapoorna_client::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Backend connection settings.
    pub backend: BackendConfig,
    /// Canned chat strings.
    pub chat: ChatConfig,
    /// Microphone capture settings.
    pub audio: AudioConfig,
    /// Transcription request settings.
    pub transcription: TranscriptionConfig,
    /// Console driver defaults.
    pub session: SessionConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the backend or the capture pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            bail!("backend.base_url must not be empty");
        }
        if !SUPPORTED_LANGUAGES.contains(&self.transcription.language.as_str()) {
            bail!(
                "unsupported transcription language {:?} (expected one of {:?})",
                self.transcription.language,
                SUPPORTED_LANGUAGES
            );
        }
        if self.audio.target_sample_rate == 0 {
            bail!("audio.target_sample_rate must be > 0");
        }
        if self.audio.min_recording_secs < 0.0 {
            bail!("audio.min_recording_secs must not be negative");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
