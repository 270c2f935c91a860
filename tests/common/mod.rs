//! Shared test utilities
//!
//! Scripted stand-ins for the external services so the pipeline can be
//! driven without audio hardware or network access.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Notify;

use duet_voice::agent::{ChatMessage, ConversationEngine, EngineEvent, EventStream, ToolSpec};
use duet_voice::arbiter::{InterruptClassifier, InterruptVerdict};
use duet_voice::voice::{AudioChunk, SpeechSegment, Synthesizer, Transcriber};
use duet_voice::{Error, Result};

/// Samples per chunk used by the helpers (32 ms at 16 kHz)
pub const CHUNK_SAMPLES: usize = 512;

/// A chunk of a loud sine tone or of digital silence
#[allow(clippy::cast_precision_loss)]
pub fn chunk(seq: u64, speech: bool) -> AudioChunk {
    let samples: Vec<f32> = if speech {
        (0..CHUNK_SAMPLES)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin())
            .collect()
    } else {
        vec![0.0; CHUNK_SAMPLES]
    };
    AudioChunk::new(seq, samples)
}

/// A sealed segment of `chunks` speech chunks
pub fn segment(turn: u64, chunks: u64) -> SpeechSegment {
    let start = turn * 1_000;
    SpeechSegment::new(turn, (start..start + chunks).map(|s| chunk(s, true)).collect(), 0)
}

/// Poll `cond` until it holds or two seconds pass
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Transcriber that always returns the same text
pub struct FakeTranscriber {
    text: String,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            text: String::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _samples: &[f32]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Stt("scripted failure".to_string()));
        }
        Ok(self.text.clone())
    }
}

/// Classifier returning a fixed verdict
pub struct FakeClassifier {
    verdict: InterruptVerdict,
    seen: Mutex<Vec<String>>,
}

impl FakeClassifier {
    pub fn new(verdict: InterruptVerdict) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl InterruptClassifier for FakeClassifier {
    async fn classify(&self, text: &str) -> Result<InterruptVerdict> {
        self.seen.lock().unwrap().push(text.to_string());
        Ok(self.verdict)
    }
}

/// One engine call as the engine saw it
#[derive(Debug, Clone)]
pub struct EngineCall {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

/// Engine that replays scripted responses, one per call
///
/// A `None` script makes that call fail. Calls past the end of the script
/// answer with a single sentence.
pub struct ScriptedEngine {
    scripts: Mutex<VecDeque<Option<Vec<EngineEvent>>>>,
    calls: Mutex<Vec<EngineCall>>,
}

impl ScriptedEngine {
    pub fn new(scripts: Vec<Option<Vec<EngineEvent>>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }
}

/// Shorthand for a list of spoken sentences
pub fn sentences(texts: &[&str]) -> Option<Vec<EngineEvent>> {
    Some(texts.iter().map(|t| EngineEvent::Text((*t).to_string())).collect())
}

#[async_trait]
impl ConversationEngine for ScriptedEngine {
    async fn respond(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<EventStream> {
        self.calls.lock().unwrap().push(EngineCall {
            messages: messages.to_vec(),
            tools: tools.to_vec(),
        });

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| sentences(&["Okay."]));

        match script {
            Some(events) => Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed()),
            None => Err(Error::Engine("scripted failure".to_string())),
        }
    }
}

/// Synthesizer that "plays" each sentence for a fixed time
///
/// `stop()` ends the current sentence immediately, like the real playback.
pub struct RecordingSynthesizer {
    sentence_time: Duration,
    spoken: Mutex<Vec<String>>,
    speak_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    stopped: Notify,
}

impl RecordingSynthesizer {
    pub fn new(sentence_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            sentence_time,
            spoken: Mutex::new(Vec::new()),
            speak_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            stopped: Notify::new(),
        })
    }

    /// Sentences that played to the end
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn speak_calls(&self) -> usize {
        self.speak_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn speak(&self, text: &str) -> Result<()> {
        self.speak_calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            () = tokio::time::sleep(self.sentence_time) => {
                self.spoken.lock().unwrap().push(text.to_string());
            }
            () = self.stopped.notified() => {}
        }
        Ok(())
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stopped.notify_waiters();
    }
}
