//! Built-in provider presets for the upstream vendors the bridge can decode.
//!
//! Each preset defines the base URL, the streaming wire format, and the default
//! environment variable for the API key. Users specify a provider name in their
//! config and the preset fills in the details.

use serde::{Deserialize, Serialize};

/// Streaming envelope family spoken by an upstream vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorFormat {
    /// `data: {"choices":[{"delta":...}]}` chunks terminated by `data: [DONE]`.
    OpenAi,
    /// Minimax `chatcompletion_pro`: `choices[].messages[]` envelopes, no sentinel.
    Minimax,
}

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub format: VendorFormat,
    pub default_api_key_env: &'static str,
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        format: VendorFormat::OpenAi,
        default_api_key_env: "OPENAI_API_KEY",
    },
    ProviderPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        format: VendorFormat::OpenAi,
        default_api_key_env: "GROQ_API_KEY",
    },
    ProviderPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        format: VendorFormat::OpenAi,
        default_api_key_env: "DEEPSEEK_API_KEY",
    },
    ProviderPreset {
        name: "moonshot",
        base_url: "https://api.moonshot.cn/v1",
        format: VendorFormat::OpenAi,
        default_api_key_env: "MOONSHOT_API_KEY",
    },
    ProviderPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        format: VendorFormat::OpenAi,
        default_api_key_env: "OPENROUTER_API_KEY",
    },
    ProviderPreset {
        name: "minimax",
        base_url: "https://api.minimax.chat/v1",
        format: VendorFormat::Minimax,
        default_api_key_env: "MINIMAX_API_KEY",
    },
];

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        PRESETS.iter().find(|p| p.name == name.to_lowercase())
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }
}
