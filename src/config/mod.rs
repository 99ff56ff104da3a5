//! Server configuration.
//!
//! Loaded from an optional TOML file, then overridden from the command line,
//! then validated once before the server starts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::encode::{DEFAULT_QUALITY, MAX_DIMENSION};

/// Well-known port the client connects to.
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5;
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 200;

/// What to do when a frame fails to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeErrorPolicy {
    /// Drop the frame and keep streaming.
    #[default]
    Skip,
    /// End the stream with an error.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Which display to capture, which part of it, and at what size.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureTarget {
    /// Display index as reported by `screen-mirror displays`; 0 is the primary.
    pub display: usize,
    pub region: Option<Rect>,
    pub output_width: Option<u32>,
    pub output_height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub bind: String,
    /// JPEG quality, 1-100.
    pub quality: u8,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub on_encode_error: EncodeErrorPolicy,
    pub capture: CaptureTarget,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", DEFAULT_PORT),
            quality: DEFAULT_QUALITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            on_encode_error: EncodeErrorPolicy::default(),
            capture: CaptureTarget::default(),
        }
    }
}

impl MirrorConfig {
    /// Load configuration from a TOML file. Missing keys take defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: MirrorConfig = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        if !(1..=100).contains(&self.quality) {
            anyhow::bail!("quality must be between 1 and 100, got {}", self.quality);
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be positive");
        }
        if self.max_poll_attempts == 0 {
            anyhow::bail!("max_poll_attempts must be positive");
        }
        if let Some(r) = self.capture.region {
            if r.width == 0 || r.height == 0 {
                anyhow::bail!("capture region must not be empty");
            }
        }
        if self.capture.output_width == Some(0) || self.capture.output_height == Some(0) {
            anyhow::bail!("output dimensions must be positive");
        }
        for dim in [self.capture.output_width, self.capture.output_height]
            .into_iter()
            .flatten()
        {
            if dim > MAX_DIMENSION {
                anyhow::bail!("output dimension {} exceeds {}", dim, MAX_DIMENSION);
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind address: {}", self.bind))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn abort_on_encode_error(&self) -> bool {
        self.on_encode_error == EncodeErrorPolicy::Abort
    }
}
