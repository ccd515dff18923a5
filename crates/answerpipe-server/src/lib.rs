//! `answerpipe` HTTP surface (library side).
//!
//! The binary in `main.rs` parses flags and calls into here; tests drive [`router`] directly.

pub mod http;

pub use http::{router, AppState};

use answerpipe_local::classify::Classifier;
use answerpipe_local::pipeline::Pipeline;
use answerpipe_local::FsStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Loads a `.env` file without overriding variables already set in the process.
///
/// `ANSWERPIPE_ENV_FILE` names an explicit file; otherwise `.env` in the working directory is
/// tried. `ANSWERPIPE_DOTENV=0` disables loading entirely. Values are never logged.
pub fn load_env_file() -> Option<PathBuf> {
    let disabled = matches!(
        std::env::var("ANSWERPIPE_DOTENV")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "0" | "false" | "no" | "off"
    );
    if disabled {
        return None;
    }
    match std::env::var("ANSWERPIPE_ENV_FILE") {
        Ok(p) if !p.trim().is_empty() => {
            let p = PathBuf::from(p.trim());
            dotenvy::from_path(&p).ok().map(|_| p)
        }
        _ => dotenvy::dotenv().ok(),
    }
}

/// Installs the global `tracing` subscriber: `RUST_LOG` filter (default `info`), output on stderr
/// so stdout stays machine-readable for CLI subcommands.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // A second init (e.g. in tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("answerpipe")
}

/// Pipeline wired from `ANSWERPIPE_*` provider settings.
pub fn pipeline_from_env() -> answerpipe_core::Result<Pipeline> {
    let client = answerpipe_local::default_client()?;
    let agent = answerpipe_local::agent_from_env(client.clone())?;
    let reformatter = answerpipe_local::reformatter_from_env(client)?;
    Ok(Pipeline::new(agent, reformatter, Classifier::for_today()))
}

/// Full application state backed by an on-disk store under `data_dir`.
pub fn state_from_env(
    data_dir: PathBuf,
    webhook_secret: Option<String>,
) -> answerpipe_core::Result<AppState> {
    let pipeline = pipeline_from_env()?;
    let store = Arc::new(FsStore::new(data_dir));
    tracing::info!(
        target: "answerpipe::server",
        agent = pipeline.agent_name(),
        reformatter = pipeline.reformatter_name(),
        data_dir = %store.root().display(),
        webhook_secret = webhook_secret.is_some(),
        "state ready"
    );
    Ok(AppState {
        pipeline,
        users: store.clone(),
        history: store,
        webhook_secret,
    })
}
