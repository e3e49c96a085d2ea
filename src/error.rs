//! Error types for the bridge.

use thiserror::Error;

use crate::event::PolicyDirection;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Read or write failure on an upstream or downstream connection.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// A data frame that could not be parsed as the vendor envelope.
    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Content policy violation ({direction})")]
    ContentPolicy { direction: PolicyDirection },

    /// The vendor reported a failure: an HTTP status, or an in-band status code.
    #[error("Vendor error (code {code}): {message}")]
    Vendor { code: i64, message: String },

    #[error("Relay session already finished")]
    RelayClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn vendor(code: i64, msg: impl Into<String>) -> Self {
        Self::Vendor {
            code,
            message: msg.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
