//! Duet Voice - an interruptible voice agent
//!
//! The voice agent talks with the user while a peer agent operates the
//! computer. The user can barge in at any time: a fast check classifies the
//! first second or two of speech and cuts playback off when it is a real
//! interruption, while the full utterance is still captured and answered.
//!
//! # Architecture
//!
//! ```text
//! mic ─▶ VoiceActivitySegmenter ──events──▶ InterruptArbiter
//!              │                              │         │
//!              ▼                         fast check  SpeechEnd
//!       SpeechSnapshotBuffer ◀─ snapshot ─┘         │
//!                                    │              ▼
//!                              InterruptSignal  ConversationDispatcher ─▶ engine ─▶ TTS
//!                                    └──────── stop() ──────────────────────────────┘
//!                                                   ▲        │ tool call
//!                          PeerWatcher (when idle) ─┘        ▼
//!                                     PeerMessageBridge ◀──▶ PeerLink (TCP)
//! ```

pub mod agent;
pub mod arbiter;
pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod error;
pub mod peer;
pub mod queue;
pub mod voice;

pub use arbiter::{ArbiterState, BusyFlag, InterruptArbiter, InterruptSignal};
pub use config::Config;
pub use daemon::Daemon;
pub use dispatcher::{ConversationDispatcher, DispatchJob, DispatcherHandle, JobOutcome};
pub use error::{Error, Result};
pub use peer::{PeerEndpoint, PeerMessage, PeerMessageBridge};
pub use voice::{SpeechSegment, SpeechSnapshotBuffer, TurnId, VoiceActivitySegmenter};
