use std::{collections::HashMap, fs};

use storage::normalize_database_url;

pub const CONFIG_FILE: &str = "server.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/assessment.db".into(),
        }
    }
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string(CONFIG_FILE).ok();
    load_settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then `server.toml` contents, then environment variables.
/// Later `APP__*` variables win over the plain names.
pub fn load_settings_from(
    file_contents: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file_contents {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) {
            if let Some(v) = file_cfg.get("bind_addr") {
                settings.bind_addr = v.clone();
            }
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
        }
    }

    for key in ["SERVER_BIND", "APP__BIND_ADDR"] {
        if let Some(v) = env(key) {
            settings.bind_addr = v;
        }
    }
    for key in ["DATABASE_URL", "APP__DATABASE_URL"] {
        if let Some(v) = env(key) {
            settings.database_url = v;
        }
    }

    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> String {
    normalize_database_url(raw_database_url, &Settings::default().database_url)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
