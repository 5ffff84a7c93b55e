//! revoice CLI: text-to-speech plus voice conversion server.
//!
//! ```text
//! revoice serve [--host 0.0.0.0] [--port 5000] [--background-load]
//! revoice render "hello world" [--out out_from_text.wav]
//! revoice generate "hello world" [--server http://localhost:5000] [--out ...]
//! revoice health [--server http://localhost:5000]
//! ```
//!
//! Configuration comes from the environment, with `.env` in the working
//! directory loaded first.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use revoice_lib::config::{ConfigError, Env, ServerSettings};
use revoice_lib::revoice_core::types::OUTPUT_FILENAME;
use revoice_lib::server::{self, AppState};
use revoice_lib::{Error, PipelinePlan};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_SERVER: &str = "http://localhost:5000";

/// revoice: speak text in a cloned voice
#[derive(Parser)]
#[command(name = "revoice", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the models and start the HTTP server
    Serve {
        /// Listen host, overrides HOST
        #[arg(long)]
        host: Option<String>,
        /// Listen port, overrides PORT
        #[arg(long)]
        port: Option<u16>,
        /// Bind first and load models in the background
        #[arg(long)]
        background_load: bool,
    },
    /// Run the pipeline once in-process and write the WAV
    Render {
        /// Text to speak
        text: String,
        #[arg(long, default_value = OUTPUT_FILENAME)]
        out: PathBuf,
    },
    /// Ask a running server to generate speech
    Generate {
        /// Text to speak
        text: String,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
        #[arg(long, default_value = OUTPUT_FILENAME)]
        out: PathBuf,
    },
    /// Check whether a running server has its models loaded
    Health {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("revoice=info,revoice_lib=info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve {
            host,
            port,
            background_load,
        } => serve(serve_env(host, port), background_load).await,
        Command::Render { text, out } => render(&text, out).await,
        Command::Generate { text, server, out } => generate(&text, &server, out).await,
        Command::Health { server } => health(&server).await,
    };

    ExitCode::from(exit_status(result))
}

const SUCCESS: u8 = 0;
const FAILURE: u8 = 1;

fn exit_status(result: Result<u8, BoxError>) -> u8 {
    match result {
        Ok(status) => status,
        Err(e) => {
            report(&e);
            FAILURE
        }
    }
}

/// Log a fatal error unless it was already logged where it was raised.
fn report(e: &BoxError) {
    let logged = matches!(
        e.downcast_ref::<Error>(),
        Some(Error::Config(ConfigError::MissingSettings(_)))
    ) || matches!(
        e.downcast_ref::<ConfigError>(),
        Some(ConfigError::MissingSettings(_))
    );
    if !logged {
        error!("{e}");
    }
}

fn serve_env(host: Option<String>, port: Option<u16>) -> Env {
    let mut env = Env::load();
    if let Some(host) = host {
        env.set("HOST", host);
    }
    if let Some(port) = port {
        env.set("PORT", port.to_string());
    }
    env
}

/// Validate every setting `serve` needs. Nothing is bound or loaded yet.
fn prepare(env: &Env) -> Result<(ServerSettings, PipelinePlan), Error> {
    let settings = ServerSettings::from_env(env)?;
    let plan = PipelinePlan::from_env(env)?;
    info!("synthesizer: {}", plan.backend().as_str());
    Ok((settings, plan))
}

async fn serve(env: Env, background_load: bool) -> Result<u8, BoxError> {
    let (settings, plan) = prepare(&env)?;

    if background_load {
        let listener = TcpListener::bind(settings.addr()).await?;
        serve_while_loading(listener, AppState::new(), plan).await?;
    } else {
        let state = AppState::with_pipeline(plan.load().await?);
        let listener = TcpListener::bind(settings.addr()).await?;
        server::serve(listener, state).await?;
    }
    Ok(SUCCESS)
}

/// Serve `/health` while the models load, then install the pipeline. A load
/// failure stops the server and is returned.
async fn serve_while_loading(
    listener: TcpListener,
    state: AppState,
    plan: PipelinePlan,
) -> Result<(), Error> {
    let server = server::serve(listener, state.clone());
    tokio::pin!(server);

    tokio::select! {
        served = &mut server => served,
        loaded = plan.load() => {
            state.install(loaded?);
            server.await
        }
    }
}

async fn render(text: &str, out: PathBuf) -> Result<u8, BoxError> {
    let env = Env::load();
    let pipeline = PipelinePlan::from_env(&env)?.load().await?;

    let artifact = pipeline.generate(text).await?;
    artifact.persist(&out).await?;
    println!("{}", out.display());
    Ok(SUCCESS)
}

async fn generate(text: &str, server: &str, out: PathBuf) -> Result<u8, BoxError> {
    let resp = reqwest::Client::new()
        .post(format!("{server}/generate"))
        .json(&serde_json::json!({ "message": text }))
        .send()
        .await?;

    if !resp.status().is_success() {
        eprintln!("{}: {}", resp.status(), resp.text().await.unwrap_or_default());
        return Ok(FAILURE);
    }

    let wav = resp.bytes().await?;
    tokio::fs::write(&out, &wav).await?;
    println!("{} ({} bytes)", out.display(), wav.len());
    Ok(SUCCESS)
}

async fn health(server: &str) -> Result<u8, BoxError> {
    let resp = reqwest::Client::new()
        .get(format!("{server}/health"))
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    println!("{status} {body}");
    Ok(if status.is_success() {
        SUCCESS
    } else {
        FAILURE
    })
}
