//! Pairing sessions against an in-memory relay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{sleep, timeout};

use codepair_core::{
    ChannelId, ChannelTransport, ClientId, EntityTag, ErrorKind, FailureReporter, Fetched, KeyStrength,
    PairingError, SessionEvent, SessionState, TransportError,
};
use codepair_relay::MemoryRelay;
use codepair_security::{CodePolicy, DerivedKey, KeyAgreementParty, PairingCode};
use codepair_session::{Message, PairingSession, SecretCodec, SessionHandle, SessionOutcome, SessionSettings};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn settings() -> SessionSettings {
    SessionSettings {
        poll_interval: ms(10),
        max_poll_attempts: 50,
        request_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

fn hello_code() -> PairingCode {
    PairingCode::new("A1B2C3", ChannelId::from("ch-42"))
}

fn codec() -> SecretCodec {
    SecretCodec::new(CodePolicy::default()).unwrap()
}

fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn states(events: &[SessionEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { state } => Some(*state),
            _ => None,
        })
        .collect()
}

fn failures(events: &[SessionEvent]) -> Vec<ErrorKind> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Failed { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect()
}

fn completed(outcome: SessionOutcome) -> (DerivedKey, Option<Value>) {
    match outcome {
        SessionOutcome::Completed { key, payload } => (key, payload),
        other => panic!("expected completion, got {other:?}"),
    }
}

fn failure_kind(outcome: SessionOutcome) -> ErrorKind {
    match outcome {
        SessionOutcome::Failed(err) => err.kind(),
        other => panic!("expected failure, got {other:?}"),
    }
}

async fn wait_for_state(handle: &SessionHandle, state: SessionState) {
    let mut rx = handle.subscribe();
    timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .expect("session ended first");
}

/// Waits for the initiator to show its code.
async fn shown_code(rx: &mut UnboundedReceiver<SessionEvent>) -> String {
    loop {
        match rx.recv().await {
            Some(SessionEvent::SecretReady { code }) => return code,
            Some(_) => continue,
            None => panic!("initiator ended before showing a code"),
        }
    }
}

/// Plays the initiator by hand so a joiner can be held in any state.
struct ScriptedInitiator {
    relay: Arc<MemoryRelay>,
    party: KeyAgreementParty,
    id: ClientId,
    channel: ChannelId,
}

impl ScriptedInitiator {
    fn new(relay: Arc<MemoryRelay>, secret: &str, channel: &str) -> Self {
        let party = KeyAgreementParty::new(secret, "initiator", "joiner", KeyStrength::Standard).unwrap();
        Self { relay, party, id: ClientId::from("scripted-initiator"), channel: ChannelId::from(channel) }
    }

    async fn send(&self, message: Message) {
        let body = codec().encode(&self.id, &message).unwrap();
        self.relay.put(&self.channel, &self.id, body).await.unwrap();
    }

    async fn send_round_one(&mut self) {
        let round_one = self.party.generate_round_one().unwrap();
        self.send(Message::RoundOne(round_one)).await;
    }

    /// Read the joiner's round one off the channel and answer it.
    async fn answer_round_one(&mut self) {
        let blob = self.relay.peek(&self.channel).await.unwrap();
        let (_, message) = codec().decode(&blob.body).unwrap();
        let Message::RoundOne(joiner_round_one) = message else {
            panic!("expected the joiner's round one");
        };
        let round_two = self.party.generate_round_two(&joiner_round_one).unwrap();
        self.send(Message::RoundTwo(round_two)).await;
    }
}

#[derive(Default)]
struct RecordingReporter {
    reports: Mutex<Vec<(i32, String)>>,
}

impl FailureReporter for RecordingReporter {
    fn report(&self, code: i32, message: &str) {
        self.reports.lock().unwrap().push((code, message.to_string()));
    }
}

/// Accepts writes, never answers reads.
#[derive(Default)]
struct HangingRelay {
    gets: AtomicUsize,
}

#[async_trait]
impl ChannelTransport for HangingRelay {
    async fn put(&self, _: &ChannelId, _: &ClientId, _: Vec<u8>) -> Result<EntityTag, TransportError> {
        Ok(EntityTag::new("v1"))
    }

    async fn create(&self, _: &ChannelId, _: &ClientId, _: Vec<u8>) -> Result<EntityTag, TransportError> {
        Ok(EntityTag::new("v1"))
    }

    async fn get(&self, _: &ChannelId, _: &ClientId, _: Option<&EntityTag>) -> Result<Fetched, TransportError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_secs(3600)).await;
        Ok(Fetched::Unchanged)
    }
}

#[tokio::test(start_paused = true)]
async fn initiator_payload_reaches_joiner() {
    let relay = Arc::new(MemoryRelay::new());
    let (itx, mut irx) = mpsc::unbounded_channel();
    let (jtx, mut jrx) = mpsc::unbounded_channel();

    let initiator = PairingSession::initiator(settings(), relay.clone(), json!({"msg": "hello"}))
        .unwrap()
        .with_code(hello_code())
        .start(itx);
    let joiner = PairingSession::joiner(settings(), relay.clone(), "A1B2C3-ch-42").unwrap().start(jtx);

    let (i, j) = tokio::join!(initiator.wait(), joiner.wait());
    let (ikey, sent) = completed(i);
    let (jkey, received) = completed(j);
    assert_eq!(ikey, jkey);
    assert_eq!(sent, None);
    assert_eq!(received, Some(json!({"msg": "hello"})));

    let key = ikey.as_bytes().to_vec();
    assert_eq!(
        drain(&mut irx),
        vec![
            SessionEvent::StateChanged { state: SessionState::AwaitingPeerRoundOne },
            SessionEvent::SecretReady { code: "A1B2C3-ch-42".into() },
            SessionEvent::StateChanged { state: SessionState::AwaitingPeerRoundTwo },
            SessionEvent::StateChanged { state: SessionState::KeyEstablished },
            SessionEvent::KeyEstablished { key: key.clone() },
            SessionEvent::StateChanged { state: SessionState::AwaitingPayload },
            SessionEvent::StateChanged { state: SessionState::Done },
        ]
    );
    assert_eq!(
        drain(&mut jrx),
        vec![
            SessionEvent::StateChanged { state: SessionState::AwaitingPeerRoundOne },
            SessionEvent::StateChanged { state: SessionState::AwaitingPeerRoundTwo },
            SessionEvent::StateChanged { state: SessionState::KeyEstablished },
            SessionEvent::KeyEstablished { key },
            SessionEvent::StateChanged { state: SessionState::AwaitingPayload },
            SessionEvent::PayloadReceived { payload: json!({"msg": "hello"}) },
            SessionEvent::StateChanged { state: SessionState::Done },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn shared_code_converges_at_every_strength() {
    for strength in KeyStrength::ALL {
        let relay = Arc::new(MemoryRelay::new());
        let settings = SessionSettings { strength, ..settings() };

        let initiator = PairingSession::initiator(settings.clone(), relay.clone(), json!(strength.modulus_bits()))
            .unwrap();
        let channel = initiator.channel().clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let initiator = initiator.start(tx);
        let shown = shown_code(&mut rx).await;
        assert!(shown.ends_with(channel.as_str()));

        let joiner = PairingSession::joiner(settings, relay.clone(), &shown).unwrap().start(());
        let (i, j) = tokio::join!(initiator.wait(), joiner.wait());
        let (ikey, _) = completed(i);
        let (jkey, payload) = completed(j);
        assert_eq!(ikey, jkey, "{strength}");
        assert_eq!(payload, Some(json!(strength.modulus_bits())));
    }
}

#[tokio::test(start_paused = true)]
async fn one_wrong_character_fails_both_sides() {
    let relay = Arc::new(MemoryRelay::new());
    let (itx, mut irx) = mpsc::unbounded_channel();
    let (jtx, mut jrx) = mpsc::unbounded_channel();

    let initiator = PairingSession::initiator(settings(), relay.clone(), json!({"msg": "hello"}))
        .unwrap()
        .with_code(hello_code())
        .start(itx);
    let joiner = PairingSession::joiner(settings(), relay.clone(), "A1B2C4-ch-42").unwrap().start(jtx);

    let (i, j) = tokio::join!(initiator.wait(), joiner.wait());
    assert_eq!(failure_kind(i), ErrorKind::KeyAgreementFailed);
    assert_eq!(failure_kind(j), ErrorKind::KeyAgreementFailed);

    for events in [drain(&mut irx), drain(&mut jrx)] {
        assert!(!states(&events).contains(&SessionState::KeyEstablished));
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::KeyEstablished { .. })));
        assert_eq!(failures(&events), vec![ErrorKind::KeyAgreementFailed]);
    }
}

#[tokio::test(start_paused = true)]
async fn own_echo_is_never_processed() {
    let relay = Arc::new(MemoryRelay::new());
    let channel = ChannelId::from("ch-42");
    let me = ClientId::from("joiner-client");

    // A well-formed round one that claims to come from the joiner itself.
    let mut party = KeyAgreementParty::new("A1B2C3", "initiator", "joiner", KeyStrength::Standard).unwrap();
    let echo = codec().encode(&me, &Message::RoundOne(party.generate_round_one().unwrap())).unwrap();

    let writer = {
        let (relay, channel, me, echo) = (relay.clone(), channel.clone(), me.clone(), echo.clone());
        tokio::spawn(async move {
            loop {
                relay.put(&channel, &me, echo.clone()).await.unwrap();
                sleep(ms(5)).await;
            }
        })
    };
    sleep(ms(1)).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let joiner = PairingSession::joiner(SessionSettings { max_poll_attempts: 5, ..settings() }, relay.clone(), "A1B2C3-ch-42")
        .unwrap()
        .with_client_id(me)
        .start(tx);

    let outcome = joiner.wait().await;
    writer.abort();

    assert_eq!(failure_kind(outcome), ErrorKind::Timeout);
    let events = drain(&mut rx);
    assert_eq!(states(&events), vec![SessionState::AwaitingPeerRoundOne, SessionState::Failed]);
}

#[tokio::test(start_paused = true)]
async fn unchanged_polls_wait_then_one_peer_message_advances_once() {
    let relay = Arc::new(MemoryRelay::new());
    let channel = ChannelId::from("ch-42");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = PairingSession::initiator(SessionSettings { max_poll_attempts: 100, ..settings() }, relay.clone(), json!(1))
        .unwrap()
        .with_code(hello_code())
        .start(tx);

    sleep(ms(1)).await;
    let published = relay.peek(&channel).await.unwrap();

    sleep(ms(54)).await;
    assert_eq!(handle.state(), SessionState::AwaitingPeerRoundOne);
    assert!(relay.get_count().await >= 5);
    assert_eq!(relay.put_count().await, 1);
    assert_eq!(relay.peek(&channel).await.unwrap(), published);

    let mut peer = KeyAgreementParty::new("A1B2C3", "joiner", "initiator", KeyStrength::Standard).unwrap();
    let peer_id = ClientId::from("peer");
    let body = codec().encode(&peer_id, &Message::RoundOne(peer.generate_round_one().unwrap())).unwrap();
    relay.put(&channel, &peer_id, body).await.unwrap();

    sleep(ms(15)).await;
    assert_eq!(handle.state(), SessionState::AwaitingPeerRoundTwo);
    assert_eq!(relay.put_count().await, 3);

    sleep(ms(50)).await;
    assert_eq!(handle.state(), SessionState::AwaitingPeerRoundTwo);
    assert_eq!(relay.put_count().await, 3);
    assert_eq!(
        states(&drain(&mut rx)),
        vec![SessionState::AwaitingPeerRoundOne, SessionState::AwaitingPeerRoundTwo]
    );

    handle.cancel();
    assert!(matches!(handle.wait().await, SessionOutcome::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn cancel_while_awaiting_round_one() {
    let relay = Arc::new(MemoryRelay::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = PairingSession::initiator(settings(), relay.clone(), json!(1)).unwrap().start(tx);
    let states_rx = handle.subscribe();

    sleep(ms(25)).await;
    assert_eq!(states(&drain(&mut rx)), vec![SessionState::AwaitingPeerRoundOne]);

    handle.cancel();
    assert!(matches!(handle.wait().await, SessionOutcome::Cancelled));
    assert_eq!(*states_rx.borrow(), SessionState::Cancelled);
    assert!(rx.recv().await.is_none());

    let polls = relay.get_count().await;
    sleep(ms(100)).await;
    assert_eq!(relay.get_count().await, polls);
}

#[tokio::test(start_paused = true)]
async fn cancel_suppresses_in_flight_fetch() {
    let relay = Arc::new(HangingRelay::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let settings = SessionSettings { request_timeout: Duration::from_secs(7200), ..settings() };
    let handle = PairingSession::initiator(settings, relay.clone(), json!(1)).unwrap().start(tx);

    sleep(ms(5)).await;
    assert_eq!(relay.gets.load(Ordering::SeqCst), 1);
    drain(&mut rx);

    handle.cancel();
    let outcome = timeout(ms(10), handle.wait()).await.expect("cancel is prompt");
    assert!(matches!(outcome, SessionOutcome::Cancelled));
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn cancel_while_awaiting_round_two_or_payload() {
    for target in [SessionState::AwaitingPeerRoundTwo, SessionState::AwaitingPayload] {
        let relay = Arc::new(MemoryRelay::new());
        let mut peer = ScriptedInitiator::new(relay.clone(), "A1B2C3", "ch-42");
        peer.send_round_one().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = PairingSession::joiner(settings(), relay.clone(), "A1B2C3-ch-42").unwrap().start(tx);
        wait_for_state(&handle, SessionState::AwaitingPeerRoundTwo).await;
        if target == SessionState::AwaitingPayload {
            peer.answer_round_one().await;
            wait_for_state(&handle, SessionState::AwaitingPayload).await;
        }

        assert_eq!(states(&drain(&mut rx)).last(), Some(&target));
        handle.cancel();
        assert!(matches!(handle.wait().await, SessionOutcome::Cancelled), "{target}");
        assert!(rx.recv().await.is_none(), "{target}");
    }
}

#[tokio::test(start_paused = true)]
async fn exhausting_attempts_times_out_exactly_once() {
    let relay = Arc::new(MemoryRelay::new());
    let reporter = Arc::new(RecordingReporter::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = PairingSession::joiner(SessionSettings { max_poll_attempts: 3, ..settings() }, relay.clone(), "A1B2C3-ch-42")
        .unwrap()
        .with_reporter(reporter.clone())
        .start(tx);

    assert_eq!(failure_kind(handle.wait().await), ErrorKind::Timeout);
    assert_eq!(relay.get_count().await, 3);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(relay.get_count().await, 3);

    let events = drain(&mut rx);
    assert_eq!(failures(&events), vec![ErrorKind::Timeout]);
    assert_eq!(states(&events), vec![SessionState::AwaitingPeerRoundOne, SessionState::Failed]);

    let reports = reporter.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, ErrorKind::Timeout.report_code());
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried_silently() {
    let relay = Arc::new(MemoryRelay::new());
    relay
        .fail_next_gets([
            TransportError::Network("reset".into()),
            TransportError::Network("reset".into()),
            TransportError::Network("reset".into()),
        ])
        .await;
    let (jtx, mut jrx) = mpsc::unbounded_channel();

    let initiator = PairingSession::initiator(settings(), relay.clone(), json!({"msg": "hello"}))
        .unwrap()
        .with_code(hello_code())
        .start(());
    let joiner = PairingSession::joiner(settings(), relay.clone(), "A1B2C3-ch-42").unwrap().start(jtx);

    let (i, j) = tokio::join!(initiator.wait(), joiner.wait());
    assert!(i.is_completed());
    assert_eq!(completed(j).1, Some(json!({"msg": "hello"})));
    assert!(failures(&drain(&mut jrx)).is_empty());
}

#[tokio::test(start_paused = true)]
async fn persistent_network_errors_fail_as_transport() {
    let relay = Arc::new(MemoryRelay::new());
    relay.fail_next_gets((0..3).map(|_| TransportError::Network("unreachable".into()))).await;

    let handle = PairingSession::joiner(SessionSettings { max_poll_attempts: 3, ..settings() }, relay.clone(), "A1B2C3-ch-42")
        .unwrap()
        .start(());
    assert_eq!(failure_kind(handle.wait().await), ErrorKind::TransportError);
}

#[tokio::test(start_paused = true)]
async fn rejected_request_fails_immediately() {
    let relay = Arc::new(MemoryRelay::new());
    relay.fail_next_gets([TransportError::Rejected { status: 403, message: "forbidden".into() }]).await;

    let handle = PairingSession::joiner(settings(), relay.clone(), "A1B2C3-ch-42").unwrap().start(());
    match handle.wait().await {
        SessionOutcome::Failed(PairingError::Transport(TransportError::Rejected { status, .. })) => {
            assert_eq!(status, 403)
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(relay.get_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn network_blip_on_publish_is_retried() {
    for blip_joiner_write in [false, true] {
        let relay = Arc::new(MemoryRelay::new());
        if !blip_joiner_write {
            relay.fail_next_puts([TransportError::Network("blip".into())]).await;
        }
        let (itx, mut irx) = mpsc::unbounded_channel();
        let (jtx, mut jrx) = mpsc::unbounded_channel();

        let initiator = PairingSession::initiator(settings(), relay.clone(), json!({"msg": "hello"}))
            .unwrap()
            .with_code(hello_code())
            .start(itx);
        if blip_joiner_write {
            wait_for_state(&initiator, SessionState::AwaitingPeerRoundOne).await;
            relay.fail_next_puts([TransportError::Network("blip".into())]).await;
        }
        let joiner = PairingSession::joiner(settings(), relay.clone(), "A1B2C3-ch-42").unwrap().start(jtx);

        let (i, j) = tokio::join!(initiator.wait(), joiner.wait());
        assert!(i.is_completed(), "blip on joiner write: {blip_joiner_write}");
        assert_eq!(completed(j).1, Some(json!({"msg": "hello"})));

        // One failed write, then I1, J1, I2, J2 and the payload.
        assert_eq!(relay.put_count().await, 6);
        let ievents = drain(&mut irx);
        assert!(failures(&ievents).is_empty());
        assert_eq!(ievents.iter().filter(|e| matches!(e, SessionEvent::SecretReady { .. })).count(), 1);
        assert!(failures(&drain(&mut jrx)).is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn persistent_publish_failure_fails_as_transport() {
    let relay = Arc::new(MemoryRelay::new());
    relay.fail_next_puts((0..3).map(|_| TransportError::Network("down".into()))).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let settings = SessionSettings { max_poll_attempts: 3, ..settings() };
    let handle = PairingSession::initiator(settings, relay.clone(), json!(1)).unwrap().start(tx);
    assert_eq!(failure_kind(handle.wait().await), ErrorKind::TransportError);
    assert_eq!(relay.put_count().await, 3);

    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::SecretReady { .. })));
    assert_eq!(states(&events), vec![SessionState::Failed]);
}

#[tokio::test(start_paused = true)]
async fn rejected_publish_fails_immediately() {
    let relay = Arc::new(MemoryRelay::new());
    relay.fail_next_puts([TransportError::Rejected { status: 403, message: "forbidden".into() }]).await;

    let handle = PairingSession::initiator(settings(), relay.clone(), json!(1)).unwrap().start(());
    assert_eq!(failure_kind(handle.wait().await), ErrorKind::TransportError);
    assert_eq!(relay.put_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn taken_channel_is_never_overwritten() {
    let relay = Arc::new(MemoryRelay::new());
    let taken = ChannelId::from("zz99");

    let first = PairingSession::initiator(settings(), relay.clone(), json!("first"))
        .unwrap()
        .with_code(PairingCode::new("AAAA2222", taken.clone()))
        .start(());
    wait_for_state(&first, SessionState::AwaitingPeerRoundOne).await;
    let original = relay.peek(&taken).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let second = PairingSession::initiator(settings(), relay.clone(), json!("second"))
        .unwrap()
        .with_code(PairingCode::new("BBBB3333", taken.clone()))
        .start(tx);
    let shown = shown_code(&mut rx).await;
    assert!(shown.starts_with("BBBB3333-"), "{shown}");
    assert!(!shown.ends_with("-zz99"), "{shown}");
    assert_eq!(relay.peek(&taken).await.unwrap(), original);

    let first_joiner = PairingSession::joiner(settings(), relay.clone(), "AAAA2222-zz99").unwrap().start(());
    let second_joiner = PairingSession::joiner(settings(), relay.clone(), &shown).unwrap().start(());

    let (i1, j1, i2, j2) = tokio::join!(first.wait(), first_joiner.wait(), second.wait(), second_joiner.wait());
    assert!(i1.is_completed());
    assert!(i2.is_completed());
    assert_eq!(completed(j1).1, Some(json!("first")));
    assert_eq!(completed(j2).1, Some(json!("second")));
}

#[tokio::test(start_paused = true)]
async fn lowercase_known_code_pairs_with_typed_code() {
    let relay = Arc::new(MemoryRelay::new());
    let initiator = PairingSession::initiator(settings(), relay.clone(), json!("ok"))
        .unwrap()
        .with_code(PairingCode::new("a1b2c3", ChannelId::from("ch-42")))
        .start(());
    let joiner = PairingSession::joiner(settings(), relay.clone(), "A1B2C3-ch-42").unwrap().start(());

    let (i, j) = tokio::join!(initiator.wait(), joiner.wait());
    assert!(i.is_completed());
    assert_eq!(completed(j).1, Some(json!("ok")));
}

#[tokio::test(start_paused = true)]
async fn deadline_bounds_the_session() {
    let relay = Arc::new(MemoryRelay::new());
    let settings = SessionSettings { max_poll_attempts: 1000, deadline: Some(ms(100)), ..settings() };

    let handle = PairingSession::joiner(settings, relay.clone(), "A1B2C3-ch-42").unwrap().start(());
    assert_eq!(failure_kind(handle.wait().await), ErrorKind::Timeout);
    assert!(relay.get_count().await <= 11);
}

#[tokio::test(start_paused = true)]
async fn garbage_on_channel_is_malformed() {
    let relay = Arc::new(MemoryRelay::new());
    relay.put(&ChannelId::from("ch-42"), &ClientId::from("peer"), b"<html>".to_vec()).await.unwrap();

    let handle = PairingSession::joiner(settings(), relay.clone(), "A1B2C3-ch-42").unwrap().start(());
    assert_eq!(failure_kind(handle.wait().await), ErrorKind::MalformedMessage);
}

#[tokio::test(start_paused = true)]
async fn out_of_turn_message_is_malformed() {
    let relay = Arc::new(MemoryRelay::new());
    let peer = ScriptedInitiator::new(relay.clone(), "A1B2C3", "ch-42");
    peer.send(Message::Payload(codepair_security::SealedPayload {
        nonce: "00".repeat(12),
        ciphertext: "00".repeat(32),
    }))
    .await;

    let handle = PairingSession::joiner(settings(), relay.clone(), "A1B2C3-ch-42").unwrap().start(());
    assert_eq!(failure_kind(handle.wait().await), ErrorKind::MalformedMessage);
}

#[tokio::test(start_paused = true)]
async fn concurrent_pairs_on_one_relay_stay_apart() {
    let relay = Arc::new(MemoryRelay::new());
    let pair = |secret: &str, channel: &str, payload: Value| {
        let code = PairingCode::new(secret, ChannelId::from(channel));
        let typed = format!("{secret}-{channel}");
        let initiator = PairingSession::initiator(settings(), relay.clone(), payload)
            .unwrap()
            .with_code(code)
            .start(());
        let joiner = PairingSession::joiner(settings(), relay.clone(), &typed).unwrap().start(());
        (initiator, joiner)
    };
    let (i1, j1) = pair("AAAA2222", "aa11", json!("first"));
    let (i2, j2) = pair("BBBB3333", "bb22", json!("second"));

    let (i1, j1, i2, j2) = tokio::join!(i1.wait(), j1.wait(), i2.wait(), j2.wait());
    let (k1, _) = completed(i1);
    let (k2, _) = completed(i2);
    let (jk1, p1) = completed(j1);
    let (jk2, p2) = completed(j2);
    assert_eq!(k1, jk1);
    assert_eq!(k2, jk2);
    assert_ne!(k1, k2);
    assert_eq!(p1, Some(json!("first")));
    assert_eq!(p2, Some(json!("second")));
}

#[test]
fn rejects_bad_codes_and_settings() {
    let relay: Arc<dyn ChannelTransport> = Arc::new(MemoryRelay::new());
    assert!(matches!(
        PairingSession::joiner(settings(), relay.clone(), "no separator"),
        Err(PairingError::InvalidParameters(_))
    ));
    assert!(matches!(
        PairingSession::initiator(SessionSettings { max_poll_attempts: 0, ..settings() }, relay, json!(1)),
        Err(PairingError::InvalidParameters(_))
    ));
}
