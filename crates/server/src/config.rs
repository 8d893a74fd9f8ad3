use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use anyhow::Context;
use client_core::ActivitySettings;
use tracing::warn;

const SETTINGS_FILE: &str = "operator.toml";
const ENV_PREFIX: &str = "APP__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: String,
    pub credentials_path: PathBuf,
    pub ledger_path: PathBuf,
    /// Base URL of the protocol gateway; without one every account stays
    /// offline.
    pub gateway_url: Option<String>,
    pub connect_stagger_ms: u64,
    pub activity_min_secs: u64,
    pub activity_max_secs: u64,
    pub broadcast_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            credentials_path: PathBuf::from("./data/accounts.json"),
            ledger_path: PathBuf::from("./data/subscriptions.json"),
            gateway_url: None,
            connect_stagger_ms: 1_000,
            activity_min_secs: 60,
            activity_max_secs: 300,
            broadcast_interval_ms: 0,
        }
    }
}

impl Settings {
    pub fn connect_stagger(&self) -> Duration {
        Duration::from_millis(self.connect_stagger_ms)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn activity(&self) -> ActivitySettings {
        ActivitySettings {
            min_delay: Duration::from_secs(self.activity_min_secs),
            max_delay: Duration::from_secs(self.activity_max_secs.max(self.activity_min_secs)),
            ..ActivitySettings::default()
        }
    }

    /// Creates the parent directories of both persisted documents.
    pub fn prepare_paths(&self) -> anyhow::Result<()> {
        for path in [&self.credentials_path, &self.ledger_path] {
            storage::prepare_document_path(path)
                .with_context(|| format!("failed to prepare '{}'", path.display()))?;
        }
        Ok(())
    }

    fn apply(&mut self, key: &str, value: String) {
        match key {
            "bind_addr" => self.bind_addr = value,
            "credentials_path" => self.credentials_path = PathBuf::from(value),
            "ledger_path" => self.ledger_path = PathBuf::from(value),
            "gateway_url" => {
                let value = value.trim().to_string();
                self.gateway_url = (!value.is_empty()).then_some(value);
            }
            "connect_stagger_ms" => set_number(&mut self.connect_stagger_ms, key, &value),
            "activity_min_secs" => set_number(&mut self.activity_min_secs, key, &value),
            "activity_max_secs" => set_number(&mut self.activity_max_secs, key, &value),
            "broadcast_interval_ms" => set_number(&mut self.broadcast_interval_ms, key, &value),
            _ => {}
        }
    }
}

const KEYS: &[&str] = &[
    "bind_addr",
    "credentials_path",
    "ledger_path",
    "gateway_url",
    "connect_stagger_ms",
    "activity_min_secs",
    "activity_max_secs",
    "broadcast_interval_ms",
];

fn set_number(slot: &mut u64, key: &str, value: &str) {
    match value.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value, "ignoring non-numeric setting"),
    }
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string(SETTINGS_FILE).ok();
    settings_from(file.as_deref(), |name| std::env::var(name).ok())
}

/// Defaults, then the settings file, then `APP__*` variables.
pub fn settings_from(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        match toml::from_str::<HashMap<String, toml::Value>>(raw) {
            Ok(file_cfg) => {
                for (key, value) in file_cfg {
                    let value = match value {
                        toml::Value::String(text) => text,
                        other => other.to_string(),
                    };
                    settings.apply(&key, value);
                }
            }
            Err(error) => warn!(%error, file = SETTINGS_FILE, "ignoring unreadable settings file"),
        }
    }

    for key in KEYS {
        if let Some(value) = env(&format!("{ENV_PREFIX}{}", key.to_ascii_uppercase())) {
            settings.apply(key, value);
        }
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
