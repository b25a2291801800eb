//! Configuration types for the MockView interview engine.
//!
//! This module provides all configuration structures used to control the
//! engine: the AI provider connection, stream framing and timeouts, the
//! reserved trigger messages, the tier policy table, rate limiting, and the
//! enrichment data files.

use std::path::Path;

use mockview_llm::BackendSettings;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::policy::PolicyTable;

/// The default config file name.
const CONFIG_FILE_NAME: &str = "mockview.json";

/// Default wall-clock budget for one AI generation in seconds.
const fn default_timeout_secs() -> u64 {
    30
}

/// Default minimum characters before a failed stream is persisted.
const fn default_partial_save_min_chars() -> usize {
    20
}

fn default_truncation_marker() -> String {
    "\n\n[truncated]".to_string()
}

/// Default marker detection buffer size in bytes.
const fn default_marker_buffer_bytes() -> usize {
    32
}

/// Default capacity of the framed-event channel.
const fn default_channel_capacity() -> usize {
    32
}

fn default_main_marker() -> String {
    "[MAIN_QUESTION]".to_string()
}

fn default_follow_up_marker() -> String {
    "[FOLLOW_UP]".to_string()
}

fn default_start_trigger() -> String {
    "__START_INTERVIEW__".to_string()
}

fn default_skip_trigger() -> String {
    "__SKIP_QUESTION__".to_string()
}

/// Default turns per caller per minute.
const fn default_turns_per_minute() -> u32 {
    30
}

/// Main configuration for the MockView engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// AI provider connection settings.
    #[serde(default)]
    pub llm: BackendSettings,

    /// Turn streaming settings.
    #[serde(default)]
    pub stream: StreamSettings,

    /// Reserved trigger messages.
    #[serde(default)]
    pub triggers: Triggers,

    /// Per-tier policy.
    #[serde(default)]
    pub tiers: PolicyTable,

    /// Per-caller turn rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Enrichment data files.
    #[serde(default)]
    pub data: DataFiles,
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `mockview.json` in the current directory. If not found,
    /// returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            EngineError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `mockview.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ConfigParseError` if the file cannot be read or
    /// parsed, and `EngineError::ConfigValidationError` if values are invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(EngineError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| EngineError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        self.stream.validate()?;
        self.triggers.validate()?;
        self.tiers.validate()?;

        if self.rate_limit.turns_per_minute == 0 {
            return Err(EngineError::config_validation(
                "rateLimit.turnsPerMinute must be greater than 0",
                "Set rateLimit.turnsPerMinute to at least 1 in your mockview.json",
            ));
        }

        if self.llm.model.trim().is_empty() {
            return Err(EngineError::config_validation(
                "llm.model must not be empty",
                "Name the provider model in your mockview.json (e.g. \"gpt-4o-mini\")",
            ));
        }

        Ok(())
    }
}

/// Settings for streaming one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    /// Wall-clock budget for the AI call in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Partial output shorter than this is discarded on failure.
    #[serde(default = "default_partial_save_min_chars")]
    pub partial_save_min_chars: usize,

    /// Suffix appended to partially saved questions.
    #[serde(default = "default_truncation_marker")]
    pub truncation_marker: String,

    /// Bytes buffered while looking for a classification marker.
    #[serde(default = "default_marker_buffer_bytes")]
    pub marker_buffer_bytes: usize,

    /// Capacity of the channel between the turn task and the response.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Marker the AI emits before a new main question.
    #[serde(default = "default_main_marker")]
    pub main_marker: String,

    /// Marker the AI emits before a follow-up question.
    #[serde(default = "default_follow_up_marker")]
    pub follow_up_marker: String,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            partial_save_min_chars: default_partial_save_min_chars(),
            truncation_marker: default_truncation_marker(),
            marker_buffer_bytes: default_marker_buffer_bytes(),
            channel_capacity: default_channel_capacity(),
            main_marker: default_main_marker(),
            follow_up_marker: default_follow_up_marker(),
        }
    }
}

impl StreamSettings {
    fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(EngineError::config_validation(
                "stream.timeoutSecs must be greater than 0",
                "Set stream.timeoutSecs to at least 1 second in your mockview.json",
            ));
        }

        if self.channel_capacity == 0 {
            return Err(EngineError::config_validation(
                "stream.channelCapacity must be greater than 0",
                "Set stream.channelCapacity to at least 1 in your mockview.json",
            ));
        }

        let main = self.main_marker.trim();
        let follow_up = self.follow_up_marker.trim();
        if main.is_empty() || follow_up.is_empty() {
            return Err(EngineError::config_validation(
                "stream markers must not be empty",
                "Provide stream.mainMarker and stream.followUpMarker in your mockview.json",
            ));
        }

        if main.starts_with(follow_up) || follow_up.starts_with(main) {
            return Err(EngineError::config_validation(
                format!("stream markers overlap: '{main}' and '{follow_up}'"),
                "Choose markers where neither is a prefix of the other",
            ));
        }

        let longest = main.len().max(follow_up.len());
        if self.marker_buffer_bytes <= longest {
            return Err(EngineError::config_validation(
                format!(
                    "stream.markerBufferBytes ({}) must exceed the longest marker ({longest} bytes)",
                    self.marker_buffer_bytes
                ),
                format!("Set stream.markerBufferBytes to at least {}", longest + 1),
            ));
        }

        Ok(())
    }
}

/// Reserved user messages with protocol meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Triggers {
    /// Sent by the client to open the interview.
    #[serde(default = "default_start_trigger")]
    pub start: String,

    /// Sent by the client to skip the pending question.
    #[serde(default = "default_skip_trigger")]
    pub skip: String,
}

impl Default for Triggers {
    fn default() -> Self {
        Self {
            start: default_start_trigger(),
            skip: default_skip_trigger(),
        }
    }
}

impl Triggers {
    fn validate(&self) -> Result<()> {
        if self.start.is_empty() || self.skip.is_empty() {
            return Err(EngineError::config_validation(
                "triggers must not be empty",
                "Provide triggers.start and triggers.skip in your mockview.json",
            ));
        }
        if self.start == self.skip {
            return Err(EngineError::config_validation(
                "triggers.start and triggers.skip must differ",
                "Use distinct reserved strings for starting and skipping",
            ));
        }
        Ok(())
    }
}

/// Per-caller turn rate limiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    /// Turns allowed per caller in each one-minute window.
    #[serde(default = "default_turns_per_minute")]
    pub turns_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            turns_per_minute: default_turns_per_minute(),
        }
    }
}

/// Paths of the JSON files backing prompt enrichment.
///
/// Any file left unset yields an empty data set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFiles {
    /// Candidate profiles and resume edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles_file: Option<String>,

    /// Technical knowledge snippets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_file: Option<String>,

    /// Company interview styles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_styles_file: Option<String>,
}
