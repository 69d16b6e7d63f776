use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use frames::PresenterCommand;
use livesync::channel::{Concern, ConnectionStatus, Environment, TransportError, WsConnector};
use livesync::state::{PresenterState, SessionSnapshot};
use livesync::{
    ApiError, ConfigError, DispatchOutcome, HttpSnapshotSource, LiveSession, SessionMessage, SnapshotSource, SyncConfig,
};
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    UnknownCommand(#[from] frames::UnknownCommand),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("timed out after {0:?} waiting for the presenter channel")]
    Timeout(Duration),
    #[error("presenter channel is {0}; command not sent")]
    Suppressed(String),
    #[error("signal handling failed: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "livesync", about = "Watch and drive live survey sessions")]
struct Cli {
    /// Survey server origin; overrides `LIVESYNC_BASE_URL`.
    #[arg(long, env = "LIVESYNC_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the live results once and print them.
    Results { survey_id: String },
    /// Follow a live session until interrupted.
    Watch {
        survey_id: String,
        /// Channels to open.
        #[arg(long = "concern", value_enum, default_values_t = [ConcernArg::Presenter, ConcernArg::Analytics])]
        concerns: Vec<ConcernArg>,
        /// Print every inbound message as a JSON line.
        #[arg(long, default_value_t = false)]
        messages: bool,
    },
    /// Send one presenter command.
    Command {
        survey_id: String,
        /// One of start_survey, pause_survey, resume_survey, stop_survey,
        /// show_results, hide_results, next_question, prev_question.
        command: String,
        /// JSON object sent as the command's `data`.
        #[arg(long)]
        data: Option<String>,
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ConcernArg {
    Presenter,
    Analytics,
    Display,
}

impl From<ConcernArg> for Concern {
    fn from(arg: ConcernArg) -> Self {
        match arg {
            ConcernArg::Presenter => Concern::Presenter,
            ConcernArg::Analytics => Concern::Analytics,
            ConcernArg::Display => Concern::Display,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.base_url.as_deref())?;

    match cli.command {
        Command::Results { survey_id } => run_results(&config, &survey_id).await,
        Command::Watch { survey_id, concerns, messages } => {
            let concerns: Vec<Concern> = concerns.into_iter().map(Concern::from).collect();
            run_watch(&config, &survey_id, &concerns, messages).await
        }
        Command::Command { survey_id, command, data, timeout_secs } => {
            run_command(&config, &survey_id, &command, data.as_deref(), Duration::from_secs(timeout_secs)).await
        }
    }
}

fn load_config(base_url: Option<&str>) -> Result<SyncConfig, CliError> {
    let config = SyncConfig::from_env()?;
    match base_url {
        Some(url) => Ok(SyncConfig { base_url: SyncConfig::with_base_url(url)?.base_url, ..config }),
        None => Ok(config),
    }
}

async fn run_results(config: &SyncConfig, survey_id: &str) -> Result<(), CliError> {
    let source = HttpSnapshotSource::new(config.base_url.clone())?;
    let results = source.live_results(survey_id).await?;
    let snapshot = SessionSnapshot::from_live_results(results, time::OffsetDateTime::now_utc());
    print_json(&snapshot_json(&snapshot))
}

async fn run_watch(config: &SyncConfig, survey_id: &str, concerns: &[Concern], messages: bool) -> Result<(), CliError> {
    let session = start_session(config, survey_id, concerns)?;
    let mut inbound = session.subscribe_messages();
    let mut views = session.subscribe_snapshot();
    let mut presenter = session.subscribe_presenter();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            msg = inbound.recv() => match msg {
                Ok(SessionMessage { concern, message }) if messages => {
                    print_json(&json!({
                        "concern": concern.as_str(),
                        "type": message.kind.as_str(),
                        "data": message.payload,
                    }))?;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => warn!(skipped, "message printer lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                let mut line = snapshot_json(&view.snapshot);
                if let Value::Object(map) = &mut line {
                    map.insert("error".into(), view.error.map_or(Value::Null, Value::String));
                    map.insert("new_activity".into(), json!(view.new_activity));
                    map.insert("outdated".into(), json!(session.results_may_be_outdated()));
                }
                print_json(&line)?;
            }
            changed = presenter.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *presenter.borrow_and_update();
                print_json(&presenter_json(&state))?;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn run_command(
    config: &SyncConfig,
    survey_id: &str,
    command: &str,
    data: Option<&str>,
    timeout: Duration,
) -> Result<(), CliError> {
    let command: PresenterCommand = command.parse()?;
    let data = data.map(serde_json::from_str::<Value>).transpose()?;

    let mut config = config.clone();
    config.aggregator.auto_refresh = false;
    let session = start_session(&config, survey_id, &[Concern::Presenter])?;

    let Some(mut status) = session.subscribe_status(Concern::Presenter) else {
        return Err(CliError::Suppressed(ConnectionStatus::Disconnected.to_string()));
    };
    let connected = tokio::time::timeout(timeout, status.wait_for(|s| s.is_connected()))
        .await
        .is_ok_and(|waited| waited.is_ok());
    if !connected {
        session.shutdown().await;
        return Err(CliError::Timeout(timeout));
    }

    let outcome = session.dispatcher().dispatch(command, data);
    if outcome == DispatchOutcome::Suppressed {
        let current = session.status(Concern::Presenter).unwrap_or_default();
        session.shutdown().await;
        return Err(CliError::Suppressed(current.to_string()));
    }
    info!(survey_id, %command, "command sent");
    print_json(&presenter_json(&session.dispatcher().state()))?;

    // Give the driver a moment to flush the frame before closing.
    tokio::time::sleep(Duration::from_millis(200)).await;
    session.shutdown().await;
    Ok(())
}

fn start_session(config: &SyncConfig, survey_id: &str, concerns: &[Concern]) -> Result<LiveSession, CliError> {
    let source: Arc<dyn SnapshotSource> = Arc::new(HttpSnapshotSource::new(config.base_url.clone())?);
    let session = LiveSession::start(survey_id, config, concerns, Arc::new(WsConnector), source, &Environment::new())?;
    Ok(session)
}

fn snapshot_json(snapshot: &SessionSnapshot) -> Value {
    let questions: Vec<Value> = snapshot
        .per_question_results
        .values()
        .map(|q| {
            let answers: Map<String, Value> = q.answers.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            json!({
                "question_id": q.question_id,
                "title": q.title,
                "total_responses": q.total_responses,
                "answers": answers,
            })
        })
        .collect();
    json!({
        "participant_count": snapshot.participant_count,
        "response_count": snapshot.response_count,
        "completed_count": snapshot.completed_count,
        "completion_rate": snapshot.completion_rate(),
        "questions": questions,
    })
}

fn presenter_json(state: &PresenterState) -> Value {
    json!({
        "phase": state.phase.as_str(),
        "results_visible": state.results_visible,
        "focused_question_index": state.focused_question_index,
    })
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
