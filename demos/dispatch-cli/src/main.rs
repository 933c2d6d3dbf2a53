//! Command-line driver for remote agent dispatch.
//!
//! Run with: cargo run -p dispatch-cli -- run "add a README"
//!
//! Progress goes to stderr; the final response goes to stdout.

use std::{path::PathBuf, sync::Arc};

use agent_dispatch_core::{
    ComputeTier, CredentialStore, DispatchConfig, SessionUpdate, StreamEvent,
    credentials::FileCredentialStore,
};
use agent_dispatch_session::{
    InputFile, Orchestrator, RunRequest, SessionError, storage::FileWorkspaceStore,
};
use agent_dispatch_transport::{DecodeCounter, HttpApi};
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "agent-dispatch", version, about = "Dispatch work to a remote agent service")]
struct Cli {
    /// Config file (defaults to the user config directory).
    #[arg(long, global = true, env = "AGENT_DISPATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Workspace directory; scopes the persisted context and session.
    #[arg(long, short, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store the bearer token used for every call.
    Login {
        #[arg(long, env = "AGENT_DISPATCH_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Forget the stored token.
    Logout,
    #[command(flatten)]
    Session(SessionCommand),
}

#[derive(Debug, Subcommand)]
enum SessionCommand {
    /// Dispatch a message and follow the session to completion.
    Run {
        message: String,
        #[arg(long, default_value_t = ComputeTier::Standard)]
        tier: ComputeTier,
        /// Where artifacts are written (defaults to the workspace).
        #[arg(long, short)]
        out: Option<PathBuf>,
        /// Files to upload before dispatching.
        #[arg(long = "input", short = 'i')]
        inputs: Vec<PathBuf>,
    },
    /// Write the artifacts of the last session again.
    Artifacts {
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Show the persisted context and session.
    Status,
    /// Dispose the context and forget the session.
    NewSession,
    /// Dispose the context now.
    Cleanup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = DispatchConfig::load(cli.config.as_deref()).context("loading config")?;
    let state_dir = config.state_dir();
    let credentials: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::new(state_dir.join("credentials.json")));

    let workspace_dir = match cli.workspace {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolving workspace")?,
    };
    let workspace = workspace_dir.display().to_string();

    let command = match cli.command {
        Command::Login { token } => {
            credentials.save(token.trim()).await?;
            eprintln!("token saved");
            return Ok(());
        }
        Command::Logout => {
            credentials.clear().await?;
            eprintln!("token removed");
            return Ok(());
        }
        Command::Session(command) => command,
    };

    let api = Arc::new(HttpApi::new(&config.api, credentials)?);
    let store = Arc::new(FileWorkspaceStore::in_dir(&state_dir));
    let decode_counter = Arc::new(DecodeCounter::new());
    let orchestrator =
        Arc::new(Orchestrator::new(api, store, &config).with_decode_observer(decode_counter.clone()));

    match command {
        SessionCommand::Run {
            message,
            tier,
            out,
            inputs,
        } => {
            let destination = out.unwrap_or_else(|| workspace_dir.clone());
            if !inputs.is_empty() {
                let files = read_inputs(&inputs).await?;
                let ctx = orchestrator.upload_inputs(&workspace, &files).await?;
                eprintln!("uploaded {} file(s) to {}", files.len(), ctx.id);
            }

            let canceller = {
                let orchestrator = Arc::clone(&orchestrator);
                let workspace = workspace.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        orchestrator.cancel(&workspace);
                    }
                })
            };
            let request = RunRequest::new(&workspace, message, destination).with_tier(tier);
            let result = orchestrator.run(request, &print_update).await;
            canceller.abort();
            let report = result?;

            if decode_counter.dropped() > 0 {
                eprintln!("warning: {} stream frame(s) could not be decoded", decode_counter.dropped());
            }
            if let Some(artifacts) = &report.artifacts {
                for path in &artifacts.written {
                    eprintln!("wrote {}", path.display());
                }
                for failure in &artifacts.failed {
                    eprintln!("failed {}: {}", failure.path, failure.reason);
                }
            }
            if let Some(err) = SessionError::from_outcome(&report.outcome) {
                bail!(err);
            }
        }
        SessionCommand::Artifacts { out } => {
            let destination = out.unwrap_or_else(|| workspace_dir.clone());
            let report = orchestrator.retrieve_artifacts(&workspace, &destination).await?;
            eprintln!("wrote {} artifact(s), {} failed", report.count(), report.failed.len());
        }
        SessionCommand::Status => {
            match orchestrator.current_context(&workspace).await? {
                Some(ctx) => println!(
                    "context {} ({} uploaded file(s))",
                    ctx.id, ctx.uploaded_file_count
                ),
                None => println!("no context"),
            }
            match orchestrator.current_session_id(&workspace).await? {
                Some(id) => println!("session {id}"),
                None => println!("no session"),
            }
        }
        SessionCommand::NewSession => {
            orchestrator.new_session(&workspace).await?;
            eprintln!("started a new session");
        }
        SessionCommand::Cleanup => {
            if orchestrator.cleanup(&workspace).await? {
                eprintln!("context disposed");
            } else {
                eprintln!("nothing disposed");
            }
        }
    }

    Ok(())
}

async fn read_inputs(paths: &[PathBuf]) -> anyhow::Result<Vec<InputFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            bail!("input {} has no usable file name", path.display());
        };
        files.push(InputFile::new(name, content));
    }
    Ok(files)
}

fn print_update(update: SessionUpdate) {
    match update {
        SessionUpdate::SessionId(id) => eprintln!("session {id}"),
        SessionUpdate::Event(StreamEvent::Progress { message }) => eprintln!("  {message}"),
        SessionUpdate::Event(StreamEvent::StepComplete { step }) => eprintln!("  step {step} done"),
        SessionUpdate::Event(StreamEvent::TodoUpdate { items }) => {
            for item in items {
                eprintln!("  [{:?}] {}", item.status, item.content);
            }
        }
        SessionUpdate::Event(StreamEvent::Error { message }) => eprintln!("error: {message}"),
        // Content is printed once, combined, when the session completes.
        SessionUpdate::Event(StreamEvent::Content { .. } | StreamEvent::Complete {}) => {}
        SessionUpdate::Response(text) => println!("{text}"),
        SessionUpdate::Finished(outcome) => tracing::debug!(?outcome, "finished"),
    }
}
