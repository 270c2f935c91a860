//! Interrupt arbitration
//!
//! Watches segmenter events. Every sealed segment goes to the dispatcher
//! (the full path). When the user starts talking while the agent is busy, a
//! fast check also runs: after a short delay it transcribes a snapshot of the
//! recent audio and asks a small model whether this is a real interruption.
//! A positive verdict raises the [`InterruptSignal`], which cuts synthesis off.

mod classifier;
mod signals;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::VoiceConfig;
use crate::dispatcher::DispatcherHandle;
use crate::voice::{SegmenterEvent, SpeechSegment, SpeechSnapshotBuffer, Transcriber, TurnId};

pub use classifier::{ChatInterruptClassifier, InterruptClassifier, InterruptVerdict};
pub use signals::{BusyFlag, BusyGuard, InterruptSignal};

/// Observable arbiter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterState {
    /// Nothing is being delivered
    Idle,
    /// A fast check is still running
    AwaitingInterruptVerdict,
    /// The agent is responding and no check is running
    Busy,
}

/// How a fast check ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastCheckOutcome {
    /// Classified as an interruption and the signal was raised
    Interrupt,
    /// Classified as filler
    Disinterrupt,
    /// Snapshot below the minimum length
    TooShort,
    /// Nothing intelligible in the snapshot
    EmptyTranscript,
    TranscriptionFailed,
    ClassifierFailed,
    /// The job it was spawned against is no longer running
    Stale,
}

/// The fast interrupt path for one turn
pub struct FastCheck {
    snapshot: SpeechSnapshotBuffer,
    transcriber: Arc<dyn Transcriber>,
    classifier: Arc<dyn InterruptClassifier>,
    interrupt: InterruptSignal,
    dispatcher: DispatcherHandle,
    delay: Duration,
    min_samples: usize,
}

impl FastCheck {
    #[must_use]
    pub fn new(
        config: &VoiceConfig,
        snapshot: SpeechSnapshotBuffer,
        transcriber: Arc<dyn Transcriber>,
        classifier: Arc<dyn InterruptClassifier>,
        interrupt: InterruptSignal,
        dispatcher: DispatcherHandle,
    ) -> Self {
        Self {
            snapshot,
            transcriber,
            classifier,
            interrupt,
            dispatcher,
            delay: config.fast_check,
            min_samples: config.min_snapshot_samples,
        }
    }

    /// Wait for the check delay, then classify one snapshot
    ///
    /// `epoch` is the dispatcher's job epoch when the turn started; the
    /// signal is only raised while that job is still being delivered.
    pub async fn run(&self, turn: TurnId, epoch: u64) -> FastCheckOutcome {
        tokio::time::sleep(self.delay).await;
        let outcome = self.check(turn, epoch).await;
        tracing::debug!(turn, ?outcome, "fast check finished");
        outcome
    }

    async fn check(&self, turn: TurnId, epoch: u64) -> FastCheckOutcome {
        let samples = self.snapshot.snapshot();
        if samples.len() < self.min_samples {
            return FastCheckOutcome::TooShort;
        }

        let text = match self.transcriber.transcribe(&samples).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(turn, error = %e, "fast check transcription failed");
                return FastCheckOutcome::TranscriptionFailed;
            }
        };
        let text = text.trim();
        if text.is_empty() {
            return FastCheckOutcome::EmptyTranscript;
        }

        match self.classifier.classify(text).await {
            Ok(InterruptVerdict::Interrupt) => {
                if !self.dispatcher.is_busy() || self.dispatcher.job_epoch() != epoch {
                    tracing::debug!(turn, text, "interrupt verdict arrived after the response ended");
                    return FastCheckOutcome::Stale;
                }
                let fresh = self.interrupt.raise();
                tracing::info!(turn, text, fresh, "interrupt confirmed");
                FastCheckOutcome::Interrupt
            }
            Ok(InterruptVerdict::Disinterrupt) => {
                tracing::debug!(turn, text, "not an interruption");
                FastCheckOutcome::Disinterrupt
            }
            Err(e) => {
                tracing::warn!(turn, error = %e, "interrupt classification failed");
                FastCheckOutcome::ClassifierFailed
            }
        }
    }
}

#[derive(Debug, Default)]
struct ArbiterCounters {
    fast_checks_spawned: AtomicU64,
    fast_checks_aborted: AtomicU64,
    segments_submitted: AtomicU64,
    segments_discarded: AtomicU64,
}

/// Point-in-time arbiter counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArbiterStats {
    pub fast_checks_spawned: u64,
    pub fast_checks_aborted: u64,
    pub segments_submitted: u64,
    pub segments_discarded: u64,
}

/// Reads arbiter counters after the arbiter has moved into its task
#[derive(Debug, Clone)]
pub struct ArbiterStatsHandle(Arc<ArbiterCounters>);

impl ArbiterStatsHandle {
    #[must_use]
    pub fn stats(&self) -> ArbiterStats {
        let c = &self.0;
        ArbiterStats {
            fast_checks_spawned: c.fast_checks_spawned.load(Ordering::Relaxed),
            fast_checks_aborted: c.fast_checks_aborted.load(Ordering::Relaxed),
            segments_submitted: c.segments_submitted.load(Ordering::Relaxed),
            segments_discarded: c.segments_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Routes segmenter events to the fast and full paths
pub struct InterruptArbiter {
    fast_check: Arc<FastCheck>,
    dispatcher: DispatcherHandle,
    checks: HashMap<TurnId, JoinHandle<FastCheckOutcome>>,
    current_turn: Option<TurnId>,
    min_speech_samples: usize,
    counters: Arc<ArbiterCounters>,
}

impl InterruptArbiter {
    #[must_use]
    pub fn new(config: &VoiceConfig, fast_check: FastCheck, dispatcher: DispatcherHandle) -> Self {
        Self {
            fast_check: Arc::new(fast_check),
            dispatcher,
            checks: HashMap::new(),
            current_turn: None,
            min_speech_samples: config.min_speech_samples(),
            counters: Arc::new(ArbiterCounters::default()),
        }
    }

    #[must_use]
    pub fn stats_handle(&self) -> ArbiterStatsHandle {
        ArbiterStatsHandle(Arc::clone(&self.counters))
    }

    /// Current state, derived from running checks and the busy flag
    #[must_use]
    pub fn state(&self) -> ArbiterState {
        if self.checks.values().any(|h| !h.is_finished()) {
            ArbiterState::AwaitingInterruptVerdict
        } else if self.dispatcher.is_busy() {
            ArbiterState::Busy
        } else {
            ArbiterState::Idle
        }
    }

    /// Turn most recently started
    #[must_use]
    pub const fn current_turn(&self) -> Option<TurnId> {
        self.current_turn
    }

    /// Route one segmenter event; never waits on I/O
    pub fn handle_event(&mut self, event: SegmenterEvent) {
        match event {
            SegmenterEvent::SpeechStart { turn } => self.on_speech_start(turn),
            SegmenterEvent::SpeechEnd { segment } => self.on_speech_end(segment),
        }
    }

    fn on_speech_start(&mut self, turn: TurnId) {
        self.checks.retain(|_, handle| !handle.is_finished());

        let stale: Vec<TurnId> = self.checks.keys().copied().filter(|t| *t < turn).collect();
        for old in stale {
            if let Some(handle) = self.checks.remove(&old) {
                handle.abort();
                self.counters.fast_checks_aborted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(turn = old, "aborted stale fast check");
            }
        }
        self.current_turn = Some(turn);

        if !self.dispatcher.is_busy() {
            tracing::debug!(turn, "speech started while idle");
            return;
        }

        let epoch = self.dispatcher.job_epoch();
        let check = Arc::clone(&self.fast_check);
        let handle = tokio::spawn(async move { check.run(turn, epoch).await });
        self.checks.insert(turn, handle);
        self.counters.fast_checks_spawned.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(turn, "speech started while busy, fast check spawned");
    }

    fn on_speech_end(&mut self, segment: SpeechSegment) {
        let turn = segment.turn();
        let samples = segment.sample_count();
        if samples < self.min_speech_samples {
            self.counters.segments_discarded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(turn, samples, "discarding segment below minimum length");
            return;
        }

        self.dispatcher.submit(segment);
        self.counters.segments_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Consume events until the segmenter stops or shutdown is requested
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SegmenterEvent>,
        cancel: CancellationToken,
    ) -> ArbiterStats {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            self.handle_event(event);
        }

        for (_, handle) in self.checks.drain() {
            handle.abort();
        }
        let stats = self.stats_handle().stats();
        tracing::info!(
            fast_checks = stats.fast_checks_spawned,
            submitted = stats.segments_submitted,
            discarded = stats.segments_discarded,
            "arbiter stopped"
        );
        stats
    }
}
