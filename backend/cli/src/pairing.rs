//! Run one side of a pairing against the configured relay.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tracing::info;

use codepair_config::PairingConfig;
use codepair_core::{ChannelTransport, ErrorKind, FailureReporter, SessionObserver, SessionState};
use codepair_logging::SessionEventLogger;
use codepair_relay::{HttpRelay, HttpReporter, TracingReporter};
use codepair_session::{PairingSession, SessionHandle, SessionOutcome, SessionSettings};

use crate::terminal_output::{code_banner, note_info, note_success, note_warn, supports_color};

/// Prints the code and progress for a person watching the terminal.
struct TerminalObserver;

impl SessionObserver for TerminalObserver {
    fn on_state_changed(&mut self, state: SessionState) {
        if state == SessionState::AwaitingPeerRoundTwo {
            note_info("Peer connected, confirming keys");
        }
    }

    fn on_secret_ready(&mut self, code: &str) {
        note_info("Enter this code on the other device:");
        println!("{}", code_banner(code, supports_color()));
    }

    fn on_key_established(&mut self, _key: &[u8]) {
        note_success("Shared key established");
    }

    fn on_failed(&mut self, kind: ErrorKind, detail: &str) {
        note_warn(&format!("Pairing failed ({kind}): {detail}"));
    }
}

fn server_of(config: &PairingConfig) -> Result<&str> {
    config
        .server
        .as_deref()
        .context("No relay server configured; pass --server or set `server` in the config")
}

fn reporter_for(config: &PairingConfig, server: &str, session: &PairingSession) -> Arc<dyn FailureReporter> {
    let enabled = config.report.as_ref().and_then(|r| r.enabled).unwrap_or(false);
    if enabled {
        Arc::new(HttpReporter::new(server, session.client_id().clone()))
    } else {
        Arc::new(TracingReporter)
    }
}

/// Show a code and send `payload` to whoever enters it.
pub async fn initiate(config: &PairingConfig, payload: Value) -> Result<()> {
    let server = server_of(config)?;
    let settings = SessionSettings::from_config(config)?;
    let transport: Arc<dyn ChannelTransport> = Arc::new(HttpRelay::new(server));

    let session = PairingSession::initiator(settings, transport, payload)?;
    let reporter = reporter_for(config, server, &session);
    let session = session.with_reporter(reporter);

    match run(session).await? {
        SessionOutcome::Completed { .. } => {
            note_success("Payload delivered");
            Ok(())
        }
        other => Err(outcome_error(other)),
    }
}

/// Enter a code shown by the initiator and print what it sends.
pub async fn join(config: &PairingConfig, code: &str) -> Result<()> {
    let server = server_of(config)?;
    let settings = SessionSettings::from_config(config)?;
    let transport: Arc<dyn ChannelTransport> = Arc::new(HttpRelay::new(server));

    let session = PairingSession::joiner(settings, transport, code.trim())?;
    let reporter = reporter_for(config, server, &session);
    let session = session.with_reporter(reporter);

    match run(session).await? {
        SessionOutcome::Completed { payload: Some(payload), .. } => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        SessionOutcome::Completed { payload: None, .. } => bail!("Session completed without a payload"),
        other => Err(outcome_error(other)),
    }
}

async fn run(session: PairingSession) -> Result<SessionOutcome> {
    info!(role = ?session.role(), channel = %session.channel(), "Starting pairing");
    let observer = SessionEventLogger::new(session.client_id().as_str()).wrapping(TerminalObserver);
    let handle = session.start(observer);
    Ok(wait_or_interrupt(handle).await)
}

/// Cancel the session on Ctrl-C.
async fn wait_or_interrupt(handle: SessionHandle) -> SessionOutcome {
    let canceller = handle.canceller();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });
    let outcome = handle.wait().await;
    interrupt.abort();
    outcome
}

fn outcome_error(outcome: SessionOutcome) -> anyhow::Error {
    match outcome {
        SessionOutcome::Failed(err) => anyhow!(err).context("Pairing failed"),
        SessionOutcome::Cancelled => anyhow!("Pairing cancelled"),
        SessionOutcome::Completed { .. } => anyhow!("Pairing completed unexpectedly"),
    }
}
