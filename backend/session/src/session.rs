//! PairingSession: drives one side of a pairing over a relay channel.
//!
//! Both sides share one overwritable slot, so they take turns:
//!
//! ```text
//! initiator                    channel                 joiner
//!   put round1   ------------>  I1
//!                               I1  ------------> get, hold own round2
//!                               J1  <------------ put round1
//!   get, put round2  <--------  J1
//!                               I2  ------------> get
//!                               J2  <------------ put round2, derive
//!   get, derive  <------------  J2
//!   put sealed payload  ----->  P   ------------> get, open
//! ```
//!
//! The joiner publishes its round two before verifying the initiator's, so
//! a wrong code fails both sides rather than leaving one polling.
//!
//! The initiator opens the channel with a create-only write. If the channel
//! is taken it draws another one, keeping the secret, before showing the
//! code. Both sides pass through `AwaitingPayload`: the initiator until its
//! sealed payload is written, the joiner until it reads it.
//!
//! Transient relay errors on reads and writes are retried on the poll
//! cadence against the attempt budget of the current state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use codepair_core::{
    ChannelId, ChannelTransport, ClientId, EntityTag, FailureReporter, Fetched, PairingError, Role,
    SessionObserver, SessionState, TransportError,
};
use codepair_security::{open, seal, AgreementError, DerivedKey, KeyAgreementParty, PairingCode, RoundMessage};

use crate::codec::{Message, SecretCodec};
use crate::poller::PollScheduler;
use crate::settings::SessionSettings;

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// `payload` is what this side received: `None` on the initiator.
    Completed { key: DerivedKey, payload: Option<Value> },
    Failed(PairingError),
    Cancelled,
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed { .. })
    }
}

/// One side of a pairing, ready to start.
pub struct PairingSession {
    role: Role,
    settings: SessionSettings,
    transport: Arc<dyn ChannelTransport>,
    reporter: Option<Arc<dyn FailureReporter>>,
    codec: SecretCodec,
    client_id: ClientId,
    code: PairingCode,
    payload: Option<Value>,
}

impl PairingSession {
    /// The side that shows the code and sends `payload`. A fresh code is
    /// drawn from the settings' code policy.
    pub fn initiator(
        settings: SessionSettings,
        transport: Arc<dyn ChannelTransport>,
        payload: Value,
    ) -> Result<Self, PairingError> {
        settings.validate()?;
        let codec = codec_for(&settings)?;
        let code = codec.generate_code().map_err(|e| PairingError::InvalidParameters(e.to_string()))?;
        Ok(Self::build(Role::Initiator, settings, transport, codec, code, Some(payload)))
    }

    /// The side that types the code shown by the initiator.
    pub fn joiner(
        settings: SessionSettings,
        transport: Arc<dyn ChannelTransport>,
        code: &str,
    ) -> Result<Self, PairingError> {
        settings.validate()?;
        let codec = codec_for(&settings)?;
        let code = codec.parse_code(code).map_err(|e| PairingError::InvalidParameters(e.to_string()))?;
        Ok(Self::build(Role::Joiner, settings, transport, codec, code, None))
    }

    fn build(
        role: Role,
        settings: SessionSettings,
        transport: Arc<dyn ChannelTransport>,
        codec: SecretCodec,
        code: PairingCode,
        payload: Option<Value>,
    ) -> Self {
        let client_id = codec.new_client_id();
        Self { role, settings, transport, reporter: None, codec, client_id, code, payload }
    }

    /// Use a known code instead of a generated one.
    pub fn with_code(mut self, code: PairingCode) -> Self {
        self.code = code;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The channel the session starts on. An initiator that finds it taken
    /// moves to another one; `on_secret_ready` shows the final code.
    pub fn channel(&self) -> &ChannelId {
        self.code.channel()
    }

    /// Spawn the session on the current Tokio runtime.
    ///
    /// # Panics
    /// When called outside a Tokio runtime.
    pub fn start<O: SessionObserver>(self, observer: O) -> SessionHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let span = info_span!("pairing", role = %self.role, channel = %self.code.channel(), client = %self.client_id);

        let driver = Driver {
            role: self.role,
            channel: self.code.channel().clone(),
            settings: self.settings,
            transport: self.transport,
            reporter: self.reporter,
            codec: self.codec,
            client_id: self.client_id,
            code: self.code,
            outgoing: self.payload,
            observer,
            cancel: cancel_rx.clone(),
            state_tx,
            state: SessionState::Idle,
            party: None,
            own_round_one: None,
            own_round_two: None,
            key: None,
            last_etag: None,
            attempts: 0,
            last_network_error: None,
            started: Instant::now(),
        };
        let task = tokio::spawn(driver.run(cancel_rx).instrument(span));

        SessionHandle { canceller: Canceller(Arc::new(cancel_tx)), state: state_rx, task }
    }
}

fn codec_for(settings: &SessionSettings) -> Result<SecretCodec, PairingError> {
    SecretCodec::new(settings.code_policy.clone()).map_err(|e| PairingError::InvalidParameters(e.to_string()))
}

/// Cancels a running session. Cheap to clone and callable from anywhere.
#[derive(Clone)]
pub struct Canceller(Arc<watch::Sender<bool>>);

impl Canceller {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// A running session. Dropping the handle detaches the session; it keeps
/// running until it finishes on its own.
pub struct SessionHandle {
    canceller: Canceller,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    /// Stop the session. It ends `Cancelled` and emits nothing further,
    /// even if a relay request is in flight.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follow state changes, `Cancelled` included.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> SessionOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => SessionOutcome::Cancelled,
        }
    }
}

/// Resolves once cancellation is requested. Never resolves if every
/// canceller is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

fn agreement_error(err: AgreementError) -> PairingError {
    match err {
        AgreementError::InvalidParameters(m) => PairingError::InvalidParameters(m),
        AgreementError::ProtocolMisuse(m) => PairingError::InvalidParameters(m.to_string()),
        AgreementError::MalformedMessage(m) => PairingError::MalformedMessage(m),
        AgreementError::KeyDerivationFailed => PairingError::KeyAgreementFailed,
    }
}

fn request_timed_out() -> TransportError {
    TransportError::Network("request timed out".into())
}

enum Step {
    Wait,
    Finished(SessionOutcome),
}

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    Create,
    Overwrite,
}

/// Channel ids tried before giving up on finding a free one.
const MAX_CHANNEL_DRAWS: u32 = 8;

struct Driver<O> {
    role: Role,
    channel: ChannelId,
    settings: SessionSettings,
    transport: Arc<dyn ChannelTransport>,
    reporter: Option<Arc<dyn FailureReporter>>,
    codec: SecretCodec,
    client_id: ClientId,
    code: PairingCode,
    outgoing: Option<Value>,
    observer: O,
    cancel: watch::Receiver<bool>,
    state_tx: watch::Sender<SessionState>,
    state: SessionState,
    party: Option<KeyAgreementParty>,
    /// Joiner only: held until the initiator's round one arrives.
    own_round_one: Option<RoundMessage>,
    /// Joiner only: held until the initiator's round two arrives.
    own_round_two: Option<RoundMessage>,
    key: Option<DerivedKey>,
    last_etag: Option<EntityTag>,
    /// Fetches made in the current waiting state.
    attempts: u32,
    last_network_error: Option<TransportError>,
    started: Instant,
}

impl<O: SessionObserver> Driver<O> {
    async fn run(mut self, mut cancel: watch::Receiver<bool>) -> SessionOutcome {
        let (poll_tx, mut poll_rx) = mpsc::unbounded_channel::<()>();
        let mut poller = PollScheduler::new();

        let begun = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => None,
            result = self.begin() => Some(result),
        };
        match begun {
            None => return self.into_cancelled(),
            Some(Err(err)) => return self.fail(err),
            Some(Ok(())) => {}
        }

        let mut delay = Duration::ZERO;
        loop {
            let tx = poll_tx.clone();
            poller.arm(delay, move || {
                let _ = tx.send(());
            });
            delay = self.settings.poll_interval;

            let woke = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => false,
                tick = poll_rx.recv() => tick.is_some(),
            };
            if !woke {
                poller.disarm();
                return self.into_cancelled();
            }

            let step = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => None,
                step = self.poll_once() => Some(step),
            };
            match step {
                None => return self.into_cancelled(),
                Some(Ok(Step::Wait)) => {}
                Some(Ok(Step::Finished(outcome))) => return outcome,
                Some(Err(err)) => return self.fail(err),
            }
        }
    }

    /// Idle -> AwaitingPeerRoundOne.
    async fn begin(&mut self) -> Result<(), PairingError> {
        let mut party = KeyAgreementParty::new(
            self.code.secret(),
            self.role.identity(),
            self.role.peer().identity(),
            self.settings.strength,
        )
        .map_err(agreement_error)?;
        let round_one = party.generate_round_one().map_err(agreement_error)?;
        self.party = Some(party);

        match self.role {
            Role::Initiator => {
                self.open_channel(Message::RoundOne(round_one)).await?;
                self.set_state(SessionState::AwaitingPeerRoundOne);
                let code = self.code.display();
                self.notify(|o| o.on_secret_ready(&code));
            }
            Role::Joiner => {
                self.own_round_one = Some(round_one);
                self.set_state(SessionState::AwaitingPeerRoundOne);
            }
        }
        Ok(())
    }

    fn check_deadline(&self) -> Result<(), PairingError> {
        match self.settings.deadline {
            Some(deadline) if self.started.elapsed() >= deadline => Err(PairingError::Timeout(format!(
                "session deadline of {}s passed while {}",
                deadline.as_secs_f64(),
                self.state
            ))),
            _ => Ok(()),
        }
    }

    async fn poll_once(&mut self) -> Result<Step, PairingError> {
        self.check_deadline()?;

        self.attempts += 1;
        let fetched = timeout(
            self.settings.request_timeout,
            self.transport.get(&self.channel, &self.client_id, self.last_etag.as_ref()),
        )
        .await
        .unwrap_or_else(|_| Err(request_timed_out()));

        match fetched {
            Ok(Fetched::Unchanged) => {
                trace!(attempt = self.attempts, "Channel unchanged");
                self.last_network_error = None;
            }
            Ok(Fetched::Modified(blob)) => {
                self.last_etag = Some(blob.etag.clone());
                let (sender, message) = self
                    .codec
                    .decode(&blob.body)
                    .map_err(|e| PairingError::MalformedMessage(e.to_string()))?;
                if sender != self.client_id {
                    debug!(kind = ?message.kind(), etag = %blob.etag, "Peer message");
                    return self.on_peer_message(message).await;
                }
                trace!(etag = %blob.etag, "Skipping own message");
                self.last_network_error = None;
            }
            Err(err) if err.is_transient() => {
                debug!(attempt = self.attempts, "Transient relay error: {}", err);
                self.last_network_error = matches!(err, TransportError::Network(_)).then_some(err);
            }
            Err(err) => return Err(err.into()),
        }

        self.check_budget()?;
        Ok(Step::Wait)
    }

    fn check_budget(&mut self) -> Result<(), PairingError> {
        if self.attempts < self.settings.max_poll_attempts {
            return Ok(());
        }
        Err(match self.last_network_error.take() {
            Some(err) => PairingError::Transport(err),
            None => PairingError::Timeout(format!("no peer message after {} polls while {}", self.attempts, self.state)),
        })
    }

    async fn on_peer_message(&mut self, message: Message) -> Result<Step, PairingError> {
        match (self.role, self.state, message) {
            (Role::Initiator, SessionState::AwaitingPeerRoundOne, Message::RoundOne(peer)) => {
                let round_two = self.party()?.generate_round_two(&peer).map_err(agreement_error)?;
                self.publish(Message::RoundTwo(round_two)).await?;
                self.set_state(SessionState::AwaitingPeerRoundTwo);
                Ok(Step::Wait)
            }
            (Role::Joiner, SessionState::AwaitingPeerRoundOne, Message::RoundOne(peer)) => {
                let round_two = self.party()?.generate_round_two(&peer).map_err(agreement_error)?;
                self.own_round_two = Some(round_two);
                let round_one = self
                    .own_round_one
                    .take()
                    .ok_or_else(|| PairingError::InvalidParameters("round one already sent".into()))?;
                self.publish(Message::RoundOne(round_one)).await?;
                self.set_state(SessionState::AwaitingPeerRoundTwo);
                Ok(Step::Wait)
            }
            (Role::Initiator, SessionState::AwaitingPeerRoundTwo, Message::RoundTwo(peer)) => {
                let key = self.derive(&peer)?;
                let payload = self
                    .outgoing
                    .take()
                    .ok_or_else(|| PairingError::InvalidParameters("no payload to send".into()))?;
                let sealed = seal(&key, &self.channel, &payload)
                    .map_err(|e| PairingError::InvalidParameters(e.to_string()))?;
                self.set_state(SessionState::AwaitingPayload);
                self.publish(Message::Payload(sealed)).await?;
                self.set_state(SessionState::Done);
                Ok(Step::Finished(SessionOutcome::Completed { key, payload: None }))
            }
            (Role::Joiner, SessionState::AwaitingPeerRoundTwo, Message::RoundTwo(peer)) => {
                let round_two = self
                    .own_round_two
                    .take()
                    .ok_or_else(|| PairingError::InvalidParameters("round two not prepared".into()))?;
                self.publish(Message::RoundTwo(round_two)).await?;
                let key = self.derive(&peer)?;
                self.key = Some(key);
                self.set_state(SessionState::AwaitingPayload);
                Ok(Step::Wait)
            }
            (Role::Joiner, SessionState::AwaitingPayload, Message::Payload(sealed)) => {
                let key = self
                    .key
                    .take()
                    .ok_or_else(|| PairingError::InvalidParameters("no key for payload".into()))?;
                let payload = open(&key, &self.channel, &sealed)
                    .map_err(|e| PairingError::MalformedMessage(e.to_string()))?;
                self.notify(|o| o.on_payload_received(&payload));
                self.set_state(SessionState::Done);
                Ok(Step::Finished(SessionOutcome::Completed { key, payload: Some(payload) }))
            }
            (_, state, message) => Err(PairingError::MalformedMessage(format!(
                "unexpected {:?} message while {state}",
                message.kind()
            ))),
        }
    }

    fn party(&mut self) -> Result<&mut KeyAgreementParty, PairingError> {
        self.party
            .as_mut()
            .ok_or_else(|| PairingError::InvalidParameters("key agreement already finished".into()))
    }

    /// AwaitingPeerRoundTwo -> KeyEstablished.
    fn derive(&mut self, peer: &RoundMessage) -> Result<DerivedKey, PairingError> {
        let key = self.party()?.derive_key(peer).map_err(agreement_error)?;
        self.party = None;
        self.set_state(SessionState::KeyEstablished);
        self.notify(|o| o.on_key_established(&key.as_bytes()[..]));
        info!(curve = self.settings.strength.curve_name(), "Key established");
        Ok(key)
    }

    async fn publish(&mut self, message: Message) -> Result<(), PairingError> {
        self.write(&message, WriteMode::Overwrite).await
    }

    /// Initiator only: claim a fresh channel for `message`, drawing a new
    /// channel id while the current one is taken.
    async fn open_channel(&mut self, message: Message) -> Result<(), PairingError> {
        let mut draws = 1;
        loop {
            match self.write(&message, WriteMode::Create).await {
                Err(PairingError::Transport(TransportError::Conflict)) if draws < MAX_CHANNEL_DRAWS => {
                    let fresh = self
                        .codec
                        .generate_code()
                        .map_err(|e| PairingError::InvalidParameters(e.to_string()))?;
                    warn!(taken = %self.channel, next = %fresh.channel(), "Channel already in use");
                    self.code = PairingCode::new(self.code.secret(), fresh.channel().clone());
                    self.channel = fresh.channel().clone();
                    draws += 1;
                }
                result => return result,
            }
        }
    }

    async fn write(&mut self, message: &Message, mode: WriteMode) -> Result<(), PairingError> {
        let body = self
            .codec
            .encode(&self.client_id, message)
            .map_err(|e| PairingError::InvalidParameters(e.to_string()))?;

        loop {
            let request = match mode {
                WriteMode::Create => self.transport.create(&self.channel, &self.client_id, body.clone()),
                WriteMode::Overwrite => self.transport.put(&self.channel, &self.client_id, body.clone()),
            };
            let written = timeout(self.settings.request_timeout, request)
                .await
                .unwrap_or_else(|_| Err(request_timed_out()));

            match written {
                Ok(etag) => {
                    debug!(kind = ?message.kind(), %etag, ?mode, "Published");
                    self.last_etag = Some(etag);
                    return Ok(());
                }
                Err(err) if err.is_transient() => {
                    self.attempts += 1;
                    debug!(attempt = self.attempts, "Publish failed, retrying: {}", err);
                    if self.attempts >= self.settings.max_poll_attempts {
                        return Err(PairingError::Transport(err));
                    }
                    self.check_deadline()?;
                    sleep(self.settings.poll_interval).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn notify(&mut self, f: impl FnOnce(&mut O)) {
        if !self.is_cancelled() {
            f(&mut self.observer);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.is_cancelled() {
            return;
        }
        info!(from = %self.state, to = %state, "Session state changed");
        self.state = state;
        if state.is_waiting() {
            self.attempts = 0;
            self.last_network_error = None;
        }
        self.state_tx.send_replace(state);
        self.observer.on_state_changed(state);
    }

    fn into_cancelled(mut self) -> SessionOutcome {
        info!(state = %self.state, "Session cancelled");
        self.state = SessionState::Cancelled;
        self.state_tx.send_replace(SessionState::Cancelled);
        SessionOutcome::Cancelled
    }

    fn fail(mut self, err: PairingError) -> SessionOutcome {
        if self.is_cancelled() {
            return self.into_cancelled();
        }
        let kind = err.kind();
        let detail = err.to_string();
        warn!(%kind, state = %self.state, "Session failed: {}", detail);
        self.set_state(SessionState::Failed);
        self.observer.on_failed(kind, &detail);
        if let Some(reporter) = &self.reporter {
            reporter.report(kind.report_code(), &detail);
        }
        SessionOutcome::Failed(err)
    }
}
