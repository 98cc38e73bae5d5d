//! Price source identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream DEX publishing ticker data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Source {
    IcpSwap = 1,
    KongSwap = 2,
}

impl Source {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Source::IcpSwap),
            2 => Some(Source::KongSwap),
            _ => None,
        }
    }

    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Display name.
    pub fn as_str(self) -> &'static str {
        match self {
            Source::IcpSwap => "ICPSwap",
            Source::KongSwap => "KongSwap",
        }
    }

    /// Lowercase key used in storage and config.
    pub fn key(self) -> &'static str {
        match self {
            Source::IcpSwap => "icpswap",
            Source::KongSwap => "kongswap",
        }
    }

    /// Parse a storage key or display name, case-insensitive.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "icpswap" => Some(Source::IcpSwap),
            "kongswap" => Some(Source::KongSwap),
            _ => None,
        }
    }

    pub fn all() -> &'static [Source] {
        &[Source::IcpSwap, Source::KongSwap]
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
