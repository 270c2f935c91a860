//! Serialized conversation dispatch
//!
//! One job at a time: speech segments and batched peer messages are queued
//! through a [`DispatcherHandle`] and processed in order by a single
//! [`ConversationDispatcher`] task. Queued speech always goes before queued
//! peer batches. While a job runs the shared busy flag is set, and the
//! synthesizer is stopped as soon as the interrupt signal is consumed.

pub mod guardrail;
mod watcher;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::agent::{ChatMessage, ConversationEngine, EngineEvent, ToolCall, ToolSpec};
use crate::arbiter::{BusyFlag, InterruptSignal};
use crate::config::DispatchConfig;
use crate::peer::{PeerMessage, PeerMessageBridge};
use crate::queue::BoundedQueue;
use crate::voice::{SpeechSegment, Synthesizer, Transcriber};

pub use guardrail::{
    DEFAULT_REDIRECT, EmptyTranscriptGuardrail, GuardrailDecision, InputGuardrail, PhraseGuardrail,
};
pub use watcher::PeerWatcher;

/// Tool through which the engine talks to the operating agent
pub const SEND_TO_PEER_TOOL: &str = "send_message_to_computer_agent";

/// Spoken when a job fails after reaching the engine
pub const FALLBACK_REPLY: &str = "Sorry, something went wrong.";

/// Schema of the peer messaging tool
#[must_use]
pub fn peer_message_tool() -> ToolSpec {
    ToolSpec {
        name: SEND_TO_PEER_TOOL.to_string(),
        description: "Send information the user provided to the computer agent filling in \
                      the form. Use it whenever the user gives a value for a field."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "What the computer agent should know or do"
                }
            },
            "required": ["message"]
        }),
    }
}

/// A unit of work for the dispatcher
#[derive(Debug, Clone)]
pub enum DispatchJob {
    /// A sealed user utterance
    Speech(SpeechSegment),
    /// Messages from the operating agent, oldest first
    Peer(Vec<PeerMessage>),
    /// A synthetic opening user turn
    Greeting(String),
}

impl DispatchJob {
    /// Short label for logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Speech(_) => "speech",
            Self::Peer(_) => "peer",
            Self::Greeting(_) => "greeting",
        }
    }

    /// Whether the engine may call tools while answering this job
    ///
    /// Peer messages are answered without tools so the agent cannot bounce
    /// a reply straight back to the peer.
    #[must_use]
    pub const fn allows_tools(&self) -> bool {
        !matches!(self, Self::Peer(_))
    }
}

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The engine's response was delivered in full
    Completed,
    /// Playback was cut off by a confirmed interrupt
    Interrupted,
    /// A guardrail rejected the input
    Skipped,
    /// A guardrail answered instead of the engine
    Redirected,
    /// The engine failed; the fallback reply was spoken
    Failed(String),
}

#[derive(Debug, Default)]
struct DispatchCounters {
    started: AtomicU64,
    completed: AtomicU64,
    interrupted: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Point-in-time dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub jobs_started: u64,
    pub jobs_completed: u64,
    pub jobs_interrupted: u64,
    pub jobs_skipped: u64,
    pub jobs_failed: u64,

    /// Highest number of jobs ever processed at once (must stay at 1)
    pub max_in_flight: usize,
}

/// Decrements the in-flight counter however the job exits
struct InFlight<'a>(&'a DispatchCounters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a DispatchCounters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        counters.max_in_flight.fetch_max(now, Ordering::AcqRel);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cloneable submission side of the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    speech: Arc<BoundedQueue<SpeechSegment>>,
    peer: Arc<BoundedQueue<Vec<PeerMessage>>>,
    busy: BusyFlag,
    counters: Arc<DispatchCounters>,
}

impl DispatcherHandle {
    /// Create a handle with fresh queues sharing `busy`
    #[must_use]
    pub fn new(speech_capacity: usize, busy: BusyFlag) -> Self {
        Self {
            speech: Arc::new(BoundedQueue::new(speech_capacity)),
            // peer messages are never dropped here; the inbox applies the bound
            peer: Arc::new(BoundedQueue::unbounded()),
            busy,
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    /// Queue a speech segment; never blocks
    pub fn submit(&self, segment: SpeechSegment) {
        let turn = segment.turn();
        if let Some(evicted) = self.speech.push(segment) {
            tracing::warn!(
                turn,
                evicted_turn = evicted.turn(),
                "speech queue full, dropped oldest segment"
            );
        }
        tracing::debug!(turn, queued = self.speech.len(), "speech segment queued");
    }

    /// Queue a batch of peer messages; never blocks
    pub fn submit_peer(&self, batch: Vec<PeerMessage>) {
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        self.peer.push(batch);
        tracing::debug!(count, queued = self.peer.len(), "peer batch queued");
    }

    /// Whether a job is being delivered right now
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.is_busy()
    }

    /// The busy flag shared with the arbiter
    #[must_use]
    pub fn busy_flag(&self) -> BusyFlag {
        self.busy.clone()
    }

    /// Monotonic id of the most recently started job
    ///
    /// Lets a fast check confirm that the job it was spawned against is
    /// still the one being delivered.
    #[must_use]
    pub fn job_epoch(&self) -> u64 {
        self.counters.started.load(Ordering::Acquire)
    }

    /// Number of queued jobs of either kind
    #[must_use]
    pub fn pending(&self) -> usize {
        self.speech.len() + self.peer.len()
    }

    /// Segments dropped by speech queue overflow
    #[must_use]
    pub fn dropped_segments(&self) -> u64 {
        self.speech.dropped()
    }

    /// Snapshot of the dispatch counters
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            jobs_started: c.started.load(Ordering::Relaxed),
            jobs_completed: c.completed.load(Ordering::Relaxed),
            jobs_interrupted: c.interrupted.load(Ordering::Relaxed),
            jobs_skipped: c.skipped.load(Ordering::Relaxed),
            jobs_failed: c.failed.load(Ordering::Relaxed),
            max_in_flight: c.max_in_flight.load(Ordering::Relaxed),
        }
    }
}

/// External services the dispatcher drives
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn ConversationEngine>,
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// Owns the conversation and processes one job at a time
pub struct ConversationDispatcher {
    collab: Collaborators,
    bridge: PeerMessageBridge,
    interrupt: InterruptSignal,
    handle: DispatcherHandle,
    guardrails: Vec<Box<dyn InputGuardrail>>,
    history: Vec<ChatMessage>,
    tools: Vec<ToolSpec>,
    max_tool_rounds: usize,
    greeting: Option<String>,
}

impl ConversationDispatcher {
    /// Create a dispatcher with the standard guardrails for `config`
    #[must_use]
    pub fn new(
        config: &DispatchConfig,
        system_prompt: &str,
        collab: Collaborators,
        bridge: PeerMessageBridge,
        busy: BusyFlag,
        interrupt: InterruptSignal,
    ) -> Self {
        let mut guardrails: Vec<Box<dyn InputGuardrail>> = vec![Box::new(EmptyTranscriptGuardrail)];
        let phrases = PhraseGuardrail::new(&config.blocked_phrases);
        if !phrases.is_empty() {
            guardrails.push(Box::new(phrases));
        }

        Self {
            collab,
            bridge,
            interrupt,
            handle: DispatcherHandle::new(config.speech_queue_capacity, busy),
            guardrails,
            history: vec![ChatMessage::system(system_prompt)],
            tools: vec![peer_message_tool()],
            max_tool_rounds: config.max_tool_rounds,
            greeting: config.greeting.clone(),
        }
    }

    /// Add a guardrail after the standard ones
    #[must_use]
    pub fn with_guardrail(mut self, guardrail: impl InputGuardrail + 'static) -> Self {
        self.guardrails.push(Box::new(guardrail));
        self
    }

    /// Handle for submitting jobs
    #[must_use]
    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Conversation so far, system prompt first
    #[must_use]
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Speak the greeting, then process queued jobs until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        if let Some(greeting) = self.greeting.take() {
            tokio::select! {
                () = cancel.cancelled() => return,
                outcome = self.process(DispatchJob::Greeting(greeting)) => {
                    tracing::debug!(?outcome, "greeting dispatched");
                }
            }
        }

        while let Some(job) = self.next_job(&cancel).await {
            tokio::select! {
                () = cancel.cancelled() => break,
                outcome = self.process(job) => {
                    tracing::debug!(?outcome, "job finished");
                }
            }
        }

        let stats = self.handle.stats();
        tracing::info!(
            started = stats.jobs_started,
            completed = stats.jobs_completed,
            interrupted = stats.jobs_interrupted,
            failed = stats.jobs_failed,
            "dispatcher stopped"
        );
    }

    /// Wait for the next job; speech before peer batches
    async fn next_job(&self, cancel: &CancellationToken) -> Option<DispatchJob> {
        let DispatcherHandle { speech, peer, .. } = &self.handle;
        loop {
            if let Some(segment) = speech.try_pop() {
                return Some(DispatchJob::Speech(segment));
            }
            if let Some(batch) = peer.try_pop() {
                return Some(DispatchJob::Peer(batch));
            }

            tokio::select! {
                () = cancel.cancelled() => return None,
                () = speech.pushed() => {}
                () = peer.pushed() => {}
            }
        }
    }

    /// Process one job to completion
    ///
    /// The busy flag is held for the whole job and released on every exit
    /// path. Any interrupt raised before the job started is discarded.
    pub async fn process(&mut self, job: DispatchJob) -> JobOutcome {
        let counters = Arc::clone(&self.handle.counters);
        let _in_flight = InFlight::enter(&counters);
        counters.started.fetch_add(1, Ordering::AcqRel);
        let _busy = self.handle.busy.acquire();
        self.interrupt.reset();

        let kind = job.kind();
        let allow_tools = job.allows_tools();
        let text = self.resolve_text(job).await;
        tracing::info!(kind, text = %text, "dispatching job");

        let outcome = match self.check_guardrails(&text) {
            GuardrailDecision::Allow => {
                self.history.push(ChatMessage::user(text));
                match self.respond(allow_tools).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(kind, error = %e, "job failed");
                        self.speak_interruptible(FALLBACK_REPLY).await;
                        JobOutcome::Failed(e.to_string())
                    }
                }
            }
            GuardrailDecision::Reject(reason) => {
                tracing::debug!(kind, reason = %reason, "job skipped");
                JobOutcome::Skipped
            }
            GuardrailDecision::Redirect(reply) => {
                if self.speak_interruptible(&reply).await {
                    JobOutcome::Interrupted
                } else {
                    JobOutcome::Redirected
                }
            }
        };

        let counter = match outcome {
            JobOutcome::Completed | JobOutcome::Redirected => &counters.completed,
            JobOutcome::Interrupted => &counters.interrupted,
            JobOutcome::Skipped => &counters.skipped,
            JobOutcome::Failed(_) => &counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    async fn resolve_text(&self, job: DispatchJob) -> String {
        match job {
            DispatchJob::Speech(segment) => {
                let samples = segment.samples();
                match self.collab.transcriber.transcribe(&samples).await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(turn = segment.turn(), error = %e, "transcription failed");
                        String::new()
                    }
                }
            }
            DispatchJob::Peer(batch) => batch
                .iter()
                .map(PeerMessage::as_user_text)
                .collect::<Vec<_>>()
                .join("\n"),
            DispatchJob::Greeting(text) => text,
        }
    }

    fn check_guardrails(&self, text: &str) -> GuardrailDecision {
        for guardrail in &self.guardrails {
            let decision = guardrail.check(text);
            if decision != GuardrailDecision::Allow {
                tracing::debug!(guardrail = guardrail.name(), ?decision, "guardrail triggered");
                return decision;
            }
        }
        GuardrailDecision::Allow
    }

    /// Stream the engine's answer to the synthesizer, running tool rounds
    ///
    /// Only fully spoken sentences are recorded in the history.
    async fn respond(&mut self, allow_tools: bool) -> Result<JobOutcome> {
        let mut round = 0;

        loop {
            // the last round offers no tools so the engine has to answer
            let offer_tools = allow_tools && round < self.max_tool_rounds;
            let tools: &[ToolSpec] = if offer_tools { &self.tools } else { &[] };
            let mut stream = self.collab.engine.respond(&self.history, tools).await?;

            let mut spoken: Vec<String> = Vec::new();
            let mut calls: Vec<ToolCall> = Vec::new();

            loop {
                let event = tokio::select! {
                    biased;
                    () = self.interrupt.consumed() => {
                        self.collab.synthesizer.stop();
                        push_spoken(&mut self.history, &spoken);
                        tracing::info!(round, "response interrupted");
                        return Ok(JobOutcome::Interrupted);
                    }
                    event = stream.next() => event,
                };

                match event {
                    None => break,
                    Some(Err(e)) => {
                        push_spoken(&mut self.history, &spoken);
                        return Err(e);
                    }
                    Some(Ok(EngineEvent::Text(sentence))) => {
                        if self.speak_interruptible(&sentence).await {
                            push_spoken(&mut self.history, &spoken);
                            tracing::info!(round, "response interrupted");
                            return Ok(JobOutcome::Interrupted);
                        }
                        spoken.push(sentence);
                    }
                    Some(Ok(EngineEvent::ToolCall(call))) => {
                        if offer_tools {
                            calls.push(call);
                        } else {
                            tracing::warn!(tool = %call.name, "ignoring tool call while tools are disabled");
                        }
                    }
                }
            }

            if calls.is_empty() {
                push_spoken(&mut self.history, &spoken);
                return Ok(JobOutcome::Completed);
            }

            let content = (!spoken.is_empty()).then(|| spoken.join(" "));
            self.history
                .push(ChatMessage::assistant_tool_calls(content, calls.clone()));
            for call in &calls {
                let result = self.execute_tool(call);
                self.history.push(ChatMessage::tool(&call.id, result));
            }
            round += 1;
        }
    }

    fn execute_tool(&self, call: &ToolCall) -> String {
        match call.name.as_str() {
            SEND_TO_PEER_TOOL => {
                let Some(message) = call.arguments.get("message").and_then(|m| m.as_str()) else {
                    tracing::warn!(arguments = %call.arguments, "peer tool call without message");
                    return "Error: missing required argument `message`".to_string();
                };
                match self.bridge.send(message) {
                    Ok(()) => {
                        tracing::info!(message, "sent to computer agent");
                        "Message sent to the computer agent.".to_string()
                    }
                    Err(e) => format!("Error: {e}"),
                }
            }
            other => {
                tracing::warn!(tool = other, "engine called unknown tool");
                format!("Error: unknown tool `{other}`")
            }
        }
    }

    /// Speak one sentence; returns `true` if an interrupt cut it off
    async fn speak_interruptible(&self, text: &str) -> bool {
        tokio::select! {
            biased;
            () = self.interrupt.consumed() => {
                self.collab.synthesizer.stop();
                true
            }
            result = self.collab.synthesizer.speak(text) => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "synthesis failed");
                }
                false
            }
        }
    }
}

fn push_spoken(history: &mut Vec<ChatMessage>, spoken: &[String]) {
    if !spoken.is_empty() {
        history.push(ChatMessage::assistant(spoken.join(" ")));
    }
}
