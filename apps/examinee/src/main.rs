use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use session_core::{
    AssessmentSession, CatalogReader, HttpBackend, IntervalClock, SessionConfig,
    SessionDependencies, StorageBackend, SubmissionSink,
};
use shared::domain::TestId;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod console;

use config::{load_settings, Backend, Settings};
use console::Console;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    test_id: i64,
    /// Name recorded with the submission.
    #[arg(long)]
    name: String,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long, conflicts_with = "server_url")]
    database_url: Option<String>,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(url) = &self.server_url {
            settings.server_url = Some(url.clone());
            settings.database_url = None;
        }
        if let Some(url) = &self.database_url {
            settings.database_url = Some(url.clone());
            settings.server_url = None;
        }
    }
}

async fn build_dependencies(settings: &Settings) -> Result<SessionDependencies> {
    let (catalog, sink): (Arc<dyn CatalogReader>, Arc<dyn SubmissionSink>) =
        match settings.backend() {
            Backend::Server(url) => {
                info!(server_url = %url, "examinee: using assessment server");
                let backend = Arc::new(HttpBackend::new(url));
                (backend.clone() as Arc<dyn CatalogReader>, backend as Arc<dyn SubmissionSink>)
            }
            Backend::Database(url) => {
                info!(database_url = %url, "examinee: using local database");
                let backend = StorageBackend::initialize(&url).await?;
                (backend.clone() as Arc<dyn CatalogReader>, backend as Arc<dyn SubmissionSink>)
            }
        };

    Ok(SessionDependencies {
        catalog,
        sink,
        clock: Arc::new(IntervalClock::new(settings.tick_period())),
        config: SessionConfig {
            submit_timeout: settings.submit_timeout(),
            ..SessionConfig::default()
        },
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    args.apply(&mut settings);
    let deps = build_dependencies(&settings).await?;

    let session = AssessmentSession::begin(&deps, TestId(args.test_id), &args.name)
        .await
        .with_context(|| format!("cannot start test {}", args.test_id))?;

    let mut console = Console::new(
        BufReader::new(tokio::io::stdin()),
        std::io::stdout(),
        session.definition(),
    );
    console
        .run(session, deps.sink.clone(), settings.submit_timeout())
        .await?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
