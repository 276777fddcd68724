use std::{fs, time::Duration};

use serde::Deserialize;

pub const CONFIG_FILE: &str = "examinee.toml";
const DEFAULT_DATABASE_URL: &str = "sqlite://./data/assessment.db";

/// Where the examinee reads tests from and sends transcripts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Server(String),
    Database(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: Option<String>,
    pub database_url: Option<String>,
    pub submit_timeout_seconds: u64,
    pub tick_millis: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: None,
            database_url: None,
            submit_timeout_seconds: 30,
            tick_millis: 1000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    database_url: Option<String>,
    submit_timeout_seconds: Option<u64>,
    tick_millis: Option<u64>,
}

impl Settings {
    /// A server URL wins over a database URL; with neither, the default
    /// local database is used.
    pub fn backend(&self) -> Backend {
        match (&self.server_url, &self.database_url) {
            (Some(url), _) => Backend::Server(url.clone()),
            (None, Some(url)) => Backend::Database(storage::normalize_database_url(
                url,
                DEFAULT_DATABASE_URL,
            )),
            (None, None) => Backend::Database(DEFAULT_DATABASE_URL.to_string()),
        }
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_seconds.max(1))
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string(CONFIG_FILE).ok();
    load_settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then `examinee.toml`, then `APP__*` environment variables.
/// Command line flags are applied on top by the caller.
pub fn load_settings_from(
    file_contents: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(file) = file_contents.and_then(|raw| toml::from_str::<FileSettings>(raw).ok()) {
        settings.server_url = file.server_url.or(settings.server_url);
        settings.database_url = file.database_url.or(settings.database_url);
        if let Some(v) = file.submit_timeout_seconds {
            settings.submit_timeout_seconds = v;
        }
        if let Some(v) = file.tick_millis {
            settings.tick_millis = v;
        }
    }

    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = Some(v);
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = Some(v);
    }
    if let Some(v) = env("APP__SUBMIT_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
        settings.submit_timeout_seconds = v;
    }
    if let Some(v) = env("APP__TICK_MILLIS").and_then(|v| v.parse().ok()) {
        settings.tick_millis = v;
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
