//! Configuration management for screenreel
//!
//! On-disk TOML settings plus resolution into the per-recording encode
//! configs handed to the pipeline factory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Video encode settings
    #[serde(default)]
    pub video: VideoSettings,

    /// Audio encode settings
    #[serde(default)]
    pub audio: AudioSettings,

    /// Output storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Virtual display settings
    #[serde(default)]
    pub display: DisplaySettings,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

/// Video codec requested from the encode pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264/AVC, most compatible
    #[default]
    H264,
    /// HEVC (H.265), better compression where supported
    Hevc,
    /// AV1, best compression but limited encoder support
    Av1,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::Hevc => "hevc",
            VideoCodec::Av1 => "av1",
        }
    }
}

/// Audio codec requested from the encode pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Aac,
    Opus,
}

impl AudioCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Opus => "opus",
        }
    }
}

/// Container format for the output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    #[default]
    Mp4,
    Mkv,
    Webm,
}

impl ContainerFormat {
    /// File extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mkv => "mkv",
            ContainerFormat::Webm => "webm",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSettings {
    /// Capture width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Capture height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Frames per second
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// Video bitrate in bits per second
    #[serde(default = "default_video_bitrate")]
    pub bitrate: u32,

    /// Keyframe interval in seconds
    #[serde(default = "default_iframe_interval")]
    pub iframe_interval_secs: u32,

    /// Preferred video codec
    #[serde(default)]
    pub codec: VideoCodec,

    /// Output container format
    #[serde(default)]
    pub container: ContainerFormat,

    /// Codec profile handed to the encoder (e.g. "high" for H.264).
    /// Encoder default when unset.
    #[serde(default)]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Whether to record audio at all (video-only when false)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Preferred audio codec
    #[serde(default)]
    pub codec: AudioCodec,

    /// Audio bitrate in bits per second
    #[serde(default = "default_audio_bitrate")]
    pub bitrate: u32,

    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Channel count
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Encoder profile (e.g. "aac_low"). Encoder default when unset.
    #[serde(default)]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root directory for recordings. When unset, the platform videos
    /// directory is used.
    pub output_root: Option<PathBuf>,

    /// Subdirectory under the root that holds the recordings
    #[serde(default = "default_subdirectory")]
    pub subdirectory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// Name given to the virtual display handle
    #[serde(default = "default_display_name")]
    pub name: String,
}

// Default value functions
fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_frame_rate() -> u32 {
    60
}

fn default_video_bitrate() -> u32 {
    10_000_000
}

fn default_iframe_interval() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_audio_bitrate() -> u32 {
    128_000
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_channels() -> u16 {
    2
}

fn default_subdirectory() -> String {
    "Screenshots".to_string()
}

fn default_display_name() -> String {
    "screenreel-display0".to_string()
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            frame_rate: default_frame_rate(),
            bitrate: default_video_bitrate(),
            iframe_interval_secs: default_iframe_interval(),
            codec: VideoCodec::default(),
            container: ContainerFormat::default(),
            profile: None,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            codec: AudioCodec::default(),
            bitrate: default_audio_bitrate(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            profile: None,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_root: None,
            subdirectory: default_subdirectory(),
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            name: default_display_name(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            video: VideoSettings::default(),
            audio: AudioSettings::default(),
            storage: StorageSettings::default(),
            display: DisplaySettings::default(),
            config_path: None,
        }
    }
}

/// Video encode parameters resolved for a single recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEncodeConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Bits per second
    pub bitrate: u32,
    /// Keyframe interval in seconds
    pub iframe_interval_secs: u32,
    pub codec: VideoCodec,
    pub container: ContainerFormat,
    /// Codec profile; encoder default when `None`
    pub profile: Option<String>,
}

/// Audio encode parameters resolved for a single recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEncodeConfig {
    pub codec: AudioCodec,
    /// Bits per second
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Encoder profile; encoder default when `None`
    pub profile: Option<String>,
}

impl RecorderConfig {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config: RecorderConfig = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config.config_path = Some(config_path);
            Ok(config)
        } else {
            // Create default config
            let config = RecorderConfig::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = match self.config_path.clone() {
            Some(path) => path,
            None => Self::default_config_path()?,
        };

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match self.config_path.clone() {
            Some(path) => Ok(path),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "screenreel", "screenreel")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Resolve the video encode config for a recording start.
    ///
    /// Returns `None` when the settings cannot describe a usable encode
    /// (zero dimension, rate, or bitrate).
    pub fn resolve_video(&self) -> Option<VideoEncodeConfig> {
        let v = &self.video;
        if v.width == 0 || v.height == 0 || v.frame_rate == 0 || v.bitrate == 0 {
            return None;
        }

        Some(VideoEncodeConfig {
            width: v.width,
            height: v.height,
            frame_rate: v.frame_rate,
            bitrate: v.bitrate,
            iframe_interval_secs: v.iframe_interval_secs.max(1),
            codec: v.codec,
            container: v.container,
            profile: v.profile.clone(),
        })
    }

    /// Resolve the audio encode config for a recording start.
    ///
    /// Returns `None` when audio is disabled; recordings are video-only in
    /// that case.
    pub fn resolve_audio(&self) -> Option<AudioEncodeConfig> {
        let a = &self.audio;
        if !a.enabled || a.bitrate == 0 || a.sample_rate == 0 || a.channels == 0 {
            return None;
        }

        Some(AudioEncodeConfig {
            codec: a.codec,
            bitrate: a.bitrate,
            sample_rate: a.sample_rate,
            channels: a.channels,
            profile: a.profile.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve() {
        let config = RecorderConfig::default();

        let video = config.resolve_video().unwrap();
        assert_eq!(video.width, 1920);
        assert_eq!(video.height, 1080);
        assert_eq!(video.frame_rate, 60);
        assert_eq!(video.codec, VideoCodec::H264);
        assert_eq!(video.container, ContainerFormat::Mp4);

        let audio = config.resolve_audio().unwrap();
        assert_eq!(audio.codec, AudioCodec::Aac);
        assert_eq!(audio.channels, 2);
    }

    #[test]
    fn test_zero_dimension_resolves_to_none() {
        let mut config = RecorderConfig::default();
        config.video.width = 0;
        assert!(config.resolve_video().is_none());

        let mut config = RecorderConfig::default();
        config.video.frame_rate = 0;
        assert!(config.resolve_video().is_none());
    }

    #[test]
    fn test_disabled_audio_resolves_to_none() {
        let mut config = RecorderConfig::default();
        config.audio.enabled = false;
        assert!(config.resolve_audio().is_none());
    }

    #[test]
    fn test_iframe_interval_floor() {
        let mut config = RecorderConfig::default();
        config.video.iframe_interval_secs = 0;
        let video = config.resolve_video().unwrap();
        assert_eq!(video.iframe_interval_secs, 1);
    }

    #[test]
    fn test_profile_passthrough() {
        // Unset by default; the encoder picks.
        let config = RecorderConfig::default();
        assert!(config.resolve_video().unwrap().profile.is_none());
        assert!(config.resolve_audio().unwrap().profile.is_none());

        let parsed: RecorderConfig = toml::from_str(
            r#"
            [video]
            profile = "high"

            [audio]
            profile = "aac_low"
            "#,
        )
        .unwrap();

        let video = parsed.resolve_video().unwrap();
        assert_eq!(video.profile.as_deref(), Some("high"));
        let audio = parsed.resolve_audio().unwrap();
        assert_eq!(audio.profile.as_deref(), Some("aac_low"));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = RecorderConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: RecorderConfig = toml::from_str(&serialized).unwrap();

        assert_eq!(parsed.video.width, config.video.width);
        assert_eq!(parsed.video.codec, config.video.codec);
        assert_eq!(parsed.audio.sample_rate, config.audio.sample_rate);
        assert_eq!(parsed.storage.subdirectory, config.storage.subdirectory);
        assert_eq!(parsed.display.name, config.display.name);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: RecorderConfig = toml::from_str(
            r#"
            [video]
            width = 1280
            height = 720
            codec = "hevc"
            container = "mkv"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.video.width, 1280);
        assert_eq!(parsed.video.codec, VideoCodec::Hevc);
        assert_eq!(parsed.video.container, ContainerFormat::Mkv);
        // Unspecified fields fall back to defaults
        assert_eq!(parsed.video.frame_rate, default_frame_rate());
        assert!(parsed.audio.enabled);
        assert_eq!(parsed.display.name, "screenreel-display0");
    }

    #[test]
    fn test_container_extensions() {
        assert_eq!(ContainerFormat::Mp4.extension(), "mp4");
        assert_eq!(ContainerFormat::Mkv.extension(), "mkv");
        assert_eq!(ContainerFormat::Webm.extension(), "webm");
    }
}
