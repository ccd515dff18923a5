use anyhow::Result;
use answerpipe_local::classify::{dispatch_message, Classifier};
use answerpipe_server::{default_data_dir, init_tracing, load_env_file, router, state_from_env};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "answerpipe")]
#[command(about = "Research-agent answer pipeline (HTTP API + CLI)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API server.
    Serve(ServeCmd),
    /// Answer one query through the non-streaming pipeline (json).
    Ask(AskCmd),
    /// Classify a query without any network call (json).
    Classify(ClassifyCmd),
    /// Diagnose configuration issues (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct ServeCmd {
    /// Listen address.
    #[arg(long, env = "ANSWERPIPE_BIND", default_value = "0.0.0.0:5000")]
    bind: SocketAddr,
    /// Directory for user and saved-answer records (default: platform data dir).
    #[arg(long, env = "ANSWERPIPE_DATA_DIR")]
    data_dir: Option<PathBuf>,
    /// Identity-provider webhook secret; `/webhook` answers 500 while unset.
    #[arg(long, env = "ANSWERPIPE_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,
}

#[derive(clap::Args, Debug)]
struct AskCmd {
    /// The question.
    query: String,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct ClassifyCmd {
    query: String,
    /// Override the current year (for deterministic output).
    #[arg(long)]
    year: Option<i32>,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
    /// Directory to probe for writability (default: ANSWERPIPE_DATA_DIR or platform data dir).
    #[arg(long, env = "ANSWERPIPE_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn has_env(k: &str) -> bool {
    std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before clap, so `env = ...` defaults can come from the file.
    let env_file = load_env_file();
    let cli = Cli::parse();
    init_tracing();
    if let Some(p) = &env_file {
        tracing::debug!(target: "answerpipe::server", path = %p.display(), "loaded env file");
    }

    match cli.command {
        Commands::Serve(args) => {
            let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
            let webhook_secret = args.webhook_secret.filter(|s| !s.trim().is_empty());
            let state = state_from_env(data_dir, webhook_secret)?;
            let listener = tokio::net::TcpListener::bind(args.bind).await?;
            tracing::info!(
                target: "answerpipe::server",
                addr = %listener.local_addr()?,
                "listening"
            );
            axum::serve(listener, router(state))
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!(target: "answerpipe::server", "shutting down");
                })
                .await?;
        }
        Commands::Ask(args) => {
            let pipeline = answerpipe_server::pipeline_from_env()?;
            let answer = pipeline.answer(&args.query).await?;
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("{}", answer.text),
                _ => println!(
                    "{}",
                    serde_json::json!({
                        "success": true,
                        "response": answer.text,
                        "classification": answer.classification,
                        "findings": answer.report.findings,
                    })
                ),
            }
        }
        Commands::Classify(args) => {
            let classifier = match args.year {
                Some(y) => Classifier::new(y),
                None => Classifier::for_today(),
            };
            let query = answerpipe_core::Query::parse(&args.query)?;
            let c = classifier.classify(&query);
            let contract = c.entity.contract();
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "classify",
                "query": query,
                "current_year": classifier.current_year(),
                "entity": c.entity,
                "force_verification": c.force_verification,
                "dispatch_message": dispatch_message(&query, &c),
                "contract": {
                    "name": contract.name,
                    "table_columns": contract.table_columns,
                    "sections": contract.sections,
                    "confidence_labels": contract.confidence_labels,
                    "news_labels": contract.news_labels,
                    "fields": contract.fields,
                },
            });
            println!("{v}");
        }
        Commands::Doctor(args) => {
            let t0 = std::time::Instant::now();

            // Env presence (booleans only; never print values).
            let runtime_configured = has_env("ANSWERPIPE_AGENT_RUNTIME_URL");
            let openai_configured = has_env("ANSWERPIPE_OPENAI_COMPAT_BASE_URL");
            let gemini_configured = has_env("ANSWERPIPE_GEMINI_API_KEY")
                || has_env("GEMINI_API_KEY")
                || has_env("GOOGLE_API_KEY");
            let webhook_configured = has_env("ANSWERPIPE_WEBHOOK_SECRET");
            let data_dir = args.data_dir.unwrap_or_else(default_data_dir);

            let mut checks: Vec<serde_json::Value> = Vec::new();

            let data_ok = (|| -> anyhow::Result<()> {
                std::fs::create_dir_all(&data_dir)?;
                let probe = data_dir.join(format!(".doctor-probe-{}", std::process::id()));
                std::fs::write(&probe, b"ok")?;
                std::fs::remove_file(&probe)?;
                Ok(())
            })();
            checks.push(serde_json::json!({
                "name": "data_dir_writable",
                "ok": data_ok.is_ok(),
                "error": data_ok.err().map(|e| e.to_string()),
            }));
            let agent_ok = runtime_configured || openai_configured;
            checks.push(serde_json::json!({
                "name": "generation_agent",
                "ok": agent_ok,
                "error": (!agent_ok).then_some(
                    "set ANSWERPIPE_AGENT_RUNTIME_URL or ANSWERPIPE_OPENAI_COMPAT_BASE_URL"
                ),
            }));
            let reformatter_ok = gemini_configured || openai_configured;
            checks.push(serde_json::json!({
                "name": "reformatter",
                "ok": reformatter_ok,
                "error": (!reformatter_ok).then_some(
                    "set ANSWERPIPE_GEMINI_API_KEY or ANSWERPIPE_OPENAI_COMPAT_BASE_URL"
                ),
            }));

            let ok = checks.iter().all(|c| c["ok"].as_bool() == Some(true));
            let payload = serde_json::json!({
                "schema_version": 1,
                "kind": "doctor",
                "ok": ok,
                "name": "answerpipe",
                "version": env!("CARGO_PKG_VERSION"),
                "configured": {
                    "agent": {
                        "agent_runtime": runtime_configured,
                        "openai_compat": openai_configured,
                    },
                    "reformatter": {
                        "gemini": gemini_configured,
                        "openai_compat": openai_configured,
                    },
                    "webhook_secret": webhook_configured,
                    "data_dir": data_dir.display().to_string(),
                },
                "checks": checks,
                "elapsed_ms": t0.elapsed().as_millis(),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => {
                    for c in payload["checks"].as_array().into_iter().flatten() {
                        let name = c["name"].as_str().unwrap_or("");
                        let ok = c["ok"].as_bool().unwrap_or(false);
                        println!("- {}: {}", name, if ok { "ok" } else { "fail" });
                    }
                }
                _ => println!("{payload}"),
            }
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "answerpipe",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("answerpipe {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{v}"),
            }
        }
    }
    Ok(())
}
