use crate::error::{BridgeError, Result};
use crate::providers::{ProviderPreset, VendorFormat};
use crate::relay::RelayConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub relay: RelaySettings,
    /// Model aliases accepted from clients, mapped to upstream model names.
    #[serde(default)]
    pub models: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<VendorFormat>,
    /// Minimax account group, required by its chat endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default)]
    pub retry_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            retry_ms: 0,
        }
    }
}

fn default_port() -> u16 {
    4300
}

fn default_api_key_env() -> String {
    "API_KEY".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    30
}

impl BridgeConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.relay.idle_timeout_secs == 0 {
            return Err(BridgeError::config("relay.idle_timeout_secs must be at least 1"));
        }
        Ok(())
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(BridgeError::config(format!(
            "No config file found. Searched: {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Resolve the effective base URL (config override or provider preset default)
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.provider.base_url {
            return Ok(url.clone());
        }

        let preset = ProviderPreset::from_name(&self.provider.name).ok_or_else(|| {
            BridgeError::config(format!(
                "Unknown provider '{}' and no base_url configured. Known providers: {}",
                self.provider.name,
                ProviderPreset::all()
                    .iter()
                    .map(|p| p.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    /// Resolve the API key from the configured environment variable
    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.provider.api_key_env).map_err(|_| {
            BridgeError::config(format!(
                "Environment variable '{}' not set. Set it with your provider API key.",
                self.provider.api_key_env
            ))
        })
    }

    /// Streaming format of the upstream: explicit setting, then preset, then OpenAI.
    pub fn vendor_format(&self) -> VendorFormat {
        if let Some(format) = self.provider.format {
            return format;
        }

        ProviderPreset::from_name(&self.provider.name)
            .map(|p| p.format)
            .unwrap_or(VendorFormat::OpenAi)
    }

    /// Full URL of the upstream streaming chat endpoint.
    pub fn chat_url(&self) -> Result<String> {
        let base_url = self.effective_base_url()?;
        let base = base_url.trim_end_matches('/');
        match self.vendor_format() {
            VendorFormat::OpenAi => Ok(format!("{}/chat/completions", base)),
            VendorFormat::Minimax => {
                let group_id = self.provider.group_id.as_deref().ok_or_else(|| {
                    BridgeError::config("Provider format 'minimax' requires provider.group_id")
                })?;
                Ok(format!("{}/text/chatcompletion_pro?GroupId={}", base, group_id))
            }
        }
    }

    /// Map a client-facing model alias to the upstream model name.
    pub fn resolve_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.models.get(model).map(String::as_str).unwrap_or(model)
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            idle_timeout: Duration::from_secs(self.relay.idle_timeout_secs),
            retry_ms: self.relay.retry_ms,
        }
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("sse-chat-bridge.toml"));

    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("sse-chat-bridge")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("sse-chat-bridge").join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join("sse-chat-bridge").join("config.toml"));
        }
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".sse-chat-bridge.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
