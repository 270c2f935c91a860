//! Dispatcher integration tests

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use duet_voice::agent::{EngineEvent, Role, ToolCall};
use duet_voice::arbiter::{BusyFlag, InterruptSignal};
use duet_voice::config::DispatchConfig;
use duet_voice::dispatcher::{
    Collaborators, ConversationDispatcher, DEFAULT_REDIRECT, DispatchJob, FALLBACK_REPLY,
    JobOutcome, PeerWatcher, SEND_TO_PEER_TOOL,
};
use duet_voice::peer::{self, PeerEndpoint, PeerMessage};
use duet_voice::voice::Transcriber;

mod common;

use common::{
    FakeTranscriber, RecordingSynthesizer, ScriptedEngine, segment, sentences, wait_until,
};

fn config() -> DispatchConfig {
    DispatchConfig {
        greeting: None,
        ..DispatchConfig::default()
    }
}

fn dispatcher(
    config: &DispatchConfig,
    engine: Arc<ScriptedEngine>,
    transcriber: Arc<dyn Transcriber>,
    synth: Arc<RecordingSynthesizer>,
) -> (ConversationDispatcher, PeerEndpoint, BusyFlag) {
    let busy = BusyFlag::new();
    let (bridge, endpoint) = peer::channel(8);
    let dispatcher = ConversationDispatcher::new(
        config,
        "You are a test assistant.",
        Collaborators {
            engine,
            transcriber,
            synthesizer: synth,
        },
        bridge,
        busy.clone(),
        InterruptSignal::new(),
    );
    (dispatcher, endpoint, busy)
}

fn peer_call(id: &str, message: &str) -> EngineEvent {
    EngineEvent::ToolCall(ToolCall {
        id: id.to_string(),
        name: SEND_TO_PEER_TOOL.to_string(),
        arguments: json!({ "message": message }),
    })
}

#[tokio::test]
async fn test_tool_call_reaches_peer() {
    let engine = ScriptedEngine::new(vec![
        Some(vec![
            EngineEvent::Text("Got it.".to_string()),
            peer_call("call_1", "name: Alex"),
        ]),
        sentences(&["I passed that on."]),
    ]);
    let synth = RecordingSynthesizer::new(Duration::from_millis(1));
    let (mut dispatcher, mut endpoint, busy) = dispatcher(
        &config(),
        engine.clone(),
        FakeTranscriber::new("my name is Alex"),
        synth.clone(),
    );

    let outcome = dispatcher.process(DispatchJob::Speech(segment(1, 10))).await;
    assert_eq!(outcome, JobOutcome::Completed);
    assert!(!busy.is_busy());

    assert_eq!(endpoint.try_next_outbound().as_deref(), Some("name: Alex"));
    assert_eq!(synth.spoken(), vec!["Got it.", "I passed that on."]);

    let calls = engine.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].tools.len(), 1);
    let last = calls[1].messages.last().unwrap();
    assert_eq!(last.role, Role::Tool);
    assert_eq!(last.tool_call_id.as_deref(), Some("call_1"));

    let history = dispatcher.history();
    assert_eq!(history[0].role, Role::System);
    assert_eq!(history.last().unwrap().content_str(), "I passed that on.");
}

#[tokio::test]
async fn test_last_tool_round_offers_no_tools() {
    let engine = ScriptedEngine::new(vec![
        Some(vec![peer_call("a", "one")]),
        Some(vec![peer_call("b", "two")]),
    ]);
    let synth = RecordingSynthesizer::new(Duration::from_millis(1));
    let config = DispatchConfig {
        max_tool_rounds: 1,
        ..config()
    };
    let (mut dispatcher, mut endpoint, _) = dispatcher(
        &config,
        engine.clone(),
        FakeTranscriber::new("fill everything"),
        synth,
    );

    let outcome = dispatcher.process(DispatchJob::Speech(segment(1, 10))).await;
    assert_eq!(outcome, JobOutcome::Completed);

    let calls = engine.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].tools.len(), 1);
    assert!(calls[1].tools.is_empty());

    // the call made while tools were withdrawn is ignored
    assert_eq!(endpoint.try_next_outbound().as_deref(), Some("one"));
    assert!(endpoint.try_next_outbound().is_none());
}

#[tokio::test]
async fn test_engine_failure_speaks_fallback_and_clears_busy() {
    let engine = ScriptedEngine::new(vec![None]);
    let synth = RecordingSynthesizer::new(Duration::from_millis(1));
    let (mut dispatcher, _endpoint, busy) = dispatcher(
        &config(),
        engine,
        FakeTranscriber::new("hello"),
        synth.clone(),
    );

    let outcome = dispatcher.process(DispatchJob::Speech(segment(1, 10))).await;
    assert!(matches!(outcome, JobOutcome::Failed(_)));
    assert!(!busy.is_busy());
    assert_eq!(synth.spoken(), vec![FALLBACK_REPLY]);
    assert_eq!(dispatcher.handle().stats().jobs_failed, 1);
}

#[tokio::test]
async fn test_failed_transcription_is_skipped() {
    let engine = ScriptedEngine::new(Vec::new());
    let synth = RecordingSynthesizer::new(Duration::from_millis(1));
    let (mut dispatcher, _endpoint, busy) = dispatcher(
        &config(),
        engine.clone(),
        FakeTranscriber::failing(),
        synth.clone(),
    );

    let outcome = dispatcher.process(DispatchJob::Speech(segment(1, 10))).await;
    assert_eq!(outcome, JobOutcome::Skipped);
    assert!(!busy.is_busy());
    assert!(engine.calls().is_empty());
    assert_eq!(synth.speak_calls(), 0);
}

#[tokio::test]
async fn test_blocked_phrase_redirects() {
    let engine = ScriptedEngine::new(Vec::new());
    let synth = RecordingSynthesizer::new(Duration::from_millis(1));
    let config = DispatchConfig {
        blocked_phrases: vec!["tell me a joke".to_string()],
        ..config()
    };
    let (mut dispatcher, _endpoint, _) = dispatcher(
        &config,
        engine.clone(),
        FakeTranscriber::new("Tell me a joke!"),
        synth.clone(),
    );

    let outcome = dispatcher.process(DispatchJob::Speech(segment(1, 10))).await;
    assert_eq!(outcome, JobOutcome::Redirected);
    assert!(engine.calls().is_empty());
    assert_eq!(synth.spoken(), vec![DEFAULT_REDIRECT]);
}

#[tokio::test]
async fn test_peer_job_is_prefixed_and_tool_free() {
    let engine = ScriptedEngine::new(vec![sentences(&["The form is done."])]);
    let synth = RecordingSynthesizer::new(Duration::from_millis(1));
    let (mut dispatcher, _endpoint, _) = dispatcher(
        &config(),
        engine.clone(),
        FakeTranscriber::new(""),
        synth,
    );

    let batch = vec![
        PeerMessage {
            seq: 1,
            payload: "submitted".to_string(),
        },
        PeerMessage {
            seq: 2,
            payload: "confirmation shown".to_string(),
        },
    ];
    let outcome = dispatcher.process(DispatchJob::Peer(batch)).await;
    assert_eq!(outcome, JobOutcome::Completed);

    let calls = engine.calls();
    assert!(calls[0].tools.is_empty());
    assert_eq!(
        calls[0].messages.last().unwrap().content_str(),
        "[FROM_COMPUTER_AGENT] submitted\n[FROM_COMPUTER_AGENT] confirmation shown"
    );
}

#[tokio::test]
async fn test_peer_messages_wait_until_idle() {
    let engine = ScriptedEngine::new(vec![
        sentences(&["Let me think.", "Here is the answer."]),
        sentences(&["The agent says the page loaded."]),
    ]);
    let synth = RecordingSynthesizer::new(Duration::from_millis(80));
    let busy = BusyFlag::new();
    let (bridge, endpoint) = peer::channel(8);
    let dispatcher = ConversationDispatcher::new(
        &config(),
        "You are a test assistant.",
        Collaborators {
            engine: engine.clone(),
            transcriber: FakeTranscriber::new("what next"),
            synthesizer: synth.clone(),
        },
        bridge.clone(),
        busy.clone(),
        InterruptSignal::new(),
    );
    let handle = dispatcher.handle();
    let watcher = PeerWatcher::new(bridge.clone(), handle.clone(), Duration::from_millis(10));

    let cancel = CancellationToken::new();
    let dispatch_task = tokio::spawn(dispatcher.run(cancel.clone()));
    let watcher_task = tokio::spawn(watcher.run(cancel.clone()));

    handle.submit(segment(1, 10));
    wait_until(|| busy.is_busy()).await;

    endpoint.deliver("page loaded");
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(busy.is_busy());
    assert_eq!(bridge.pending(), 1);

    wait_until(|| handle.stats().jobs_completed == 2).await;
    assert_eq!(bridge.pending(), 0);

    let calls = engine.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[1].messages.last().unwrap().content_str(),
        "[FROM_COMPUTER_AGENT] page loaded"
    );
    assert_eq!(handle.stats().max_in_flight, 1);

    cancel.cancel();
    dispatch_task.await.unwrap();
    watcher_task.await.unwrap();
}

#[tokio::test]
async fn test_speech_goes_before_peer_batches() {
    let engine = ScriptedEngine::new(Vec::new());
    let synth = RecordingSynthesizer::new(Duration::from_millis(1));
    let (dispatcher, _endpoint, _) = dispatcher(
        &config(),
        engine.clone(),
        FakeTranscriber::new("speech first"),
        synth,
    );
    let handle = dispatcher.handle();

    handle.submit_peer(vec![PeerMessage {
        seq: 1,
        payload: "peer later".to_string(),
    }]);
    handle.submit(segment(1, 10));
    assert_eq!(handle.pending(), 2);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(dispatcher.run(cancel.clone()));
    wait_until(|| handle.stats().jobs_completed == 2).await;

    let calls = engine.calls();
    assert_eq!(calls[0].messages.last().unwrap().content_str(), "speech first");
    assert_eq!(
        calls[1].messages.last().unwrap().content_str(),
        "[FROM_COMPUTER_AGENT] peer later"
    );

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_greeting_runs_first() {
    let engine = ScriptedEngine::new(vec![sentences(&["Hi, I'm here to help."])]);
    let synth = RecordingSynthesizer::new(Duration::from_millis(1));
    let config = DispatchConfig {
        greeting: Some("Hello, introduce yourself.".to_string()),
        ..DispatchConfig::default()
    };
    let (dispatcher, _endpoint, _) = dispatcher(
        &config,
        engine.clone(),
        FakeTranscriber::new(""),
        synth.clone(),
    );
    let handle = dispatcher.handle();

    let cancel = CancellationToken::new();
    let task = tokio::spawn(dispatcher.run(cancel.clone()));
    wait_until(|| handle.stats().jobs_completed == 1).await;

    assert_eq!(synth.spoken(), vec!["Hi, I'm here to help."]);
    assert_eq!(
        engine.calls()[0].messages.last().unwrap().content_str(),
        "Hello, introduce yourself."
    );

    cancel.cancel();
    task.await.unwrap();
}

#[test]
fn test_bridge_send_is_nonblocking() {
    let (bridge, mut endpoint) = peer::channel(1);
    for i in 0..100 {
        tokio_test::assert_ok!(bridge.send(format!("message {i}")));
    }
    assert_eq!(endpoint.try_next_outbound().as_deref(), Some("message 0"));
}
