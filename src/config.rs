//! # Configuration
//!
//! Everything tunable about a printer setup, loadable from a TOML file.
//! Every field has a default, so an empty file (or no file) is valid.
//!
//! ```toml
//! printer = "A6+"
//! address = "04:7F:0E:B0:CA:57"
//! dithering = "floyd-steinberg"
//! queue = "queue"
//!
//! [encode]
//! density = "dark"
//! feed_rows = 40
//! compress = false
//! band_height = 24
//!
//! [session]
//! ack_mode = "implicit"
//! window = 1
//! retries = 2
//! ack_timeout_ms = 2000
//!
//! [link]
//! mtu = 182
//! inter_packet_delay_ms = 10
//! ```
//!
//! Durations are whole milliseconds.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encode::{ChunkConfig, EncodeOptions, LINK_HEADER_OVERHEAD};
use crate::error::ConfigError;
use crate::job::queue::QueuePolicy;
use crate::printer::PrinterModel;
use crate::render::DitheringAlgorithm;
use crate::transport::SessionConfig;

/// Default link MTU, header included.
pub const DEFAULT_MTU: usize = 182;

/// Default pause after each packet. The printer has no flow control of its
/// own and drops data that arrives faster than the head burns it.
pub const DEFAULT_INTER_PACKET_DELAY: Duration = Duration::from_millis(10);

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripageConfig {
    pub printer: PrinterModel,
    /// RFCOMM device path or MAC address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub dithering: DitheringAlgorithm,
    pub queue: QueuePolicy,
    pub encode: EncodeOptions,
    pub session: SessionConfig,
    pub link: LinkConfig,
}

/// Radio link sizing and pacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub mtu: usize,
    #[serde(rename = "inter_packet_delay_ms", with = "millis")]
    pub inter_packet_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            inter_packet_delay: DEFAULT_INTER_PACKET_DELAY,
        }
    }
}

impl PeripageConfig {
    /// Read and validate a TOML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), printer = config.printer.name, "loaded config");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link.mtu <= LINK_HEADER_OVERHEAD {
            return Err(ConfigError::MtuTooSmall {
                mtu: self.link.mtu,
                overhead: LINK_HEADER_OVERHEAD,
            });
        }
        self.encode.validate()?;
        self.session.validate()
    }

    /// Encoder options capped at the printer's head width.
    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            max_width: Some(self.printer.width_dots as u32),
            ..self.encode.clone()
        }
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            mtu: self.link.mtu,
            inter_packet_delay: self.link.inter_packet_delay,
        }
    }
}

/// `Duration` as whole milliseconds, for `#[serde(with = "millis")]`.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
