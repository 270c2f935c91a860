//! Daemon - the voice agent service
//!
//! Wires capture, segmentation, interrupt arbitration, dispatch and the peer
//! link together and runs them until Ctrl-C.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::OpenAiEngine;
use crate::arbiter::{
    BusyFlag, ChatInterruptClassifier, FastCheck, InterruptArbiter, InterruptSignal,
};
use crate::dispatcher::{Collaborators, ConversationDispatcher, PeerWatcher};
use crate::peer::{self, PeerLink};
use crate::voice::{
    AudioCapture, AudioPlayback, OpenAiSynthesizer, OpenAiTranscriber, PLAYBACK_SAMPLE_RATE,
    SpeechSnapshotBuffer, Transcriber, VoiceActivitySegmenter, build_classifier,
};
use crate::{Config, Result};

/// Chunks buffered between the audio callback and the segmenter
const CHUNK_BUFFER: usize = 256;

/// The voice agent daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run until Ctrl-C
    ///
    /// The capture stream is not `Send`, so this future stays on the
    /// calling task; everything else is spawned.
    ///
    /// # Errors
    ///
    /// Returns error if an adapter cannot be created, the audio devices are
    /// unavailable or the peer link cannot bind
    #[allow(clippy::future_not_send, clippy::too_many_lines)]
    pub async fn run(self) -> Result<()> {
        let Config {
            voice,
            llm,
            classifier,
            speech,
            peer: peer_config,
            dispatch,
            ..
        } = &self.config;
        let api_key = self.config.openai_key()?;

        tracing::info!(
            llm = %llm.model,
            classifier = %classifier.model,
            stt = %speech.stt_model,
            tts = %speech.tts_model,
            "starting voice agent"
        );

        let transcriber: Arc<dyn Transcriber> = Arc::new(OpenAiTranscriber::new(
            api_key.clone(),
            speech.base_url.clone(),
            speech.stt_model.clone(),
            voice.sample_rate,
        )?);
        let synthesizer = Arc::new(OpenAiSynthesizer::new(
            api_key.clone(),
            speech.base_url.clone(),
            speech.tts_model.clone(),
            speech.tts_voice.clone(),
            AudioPlayback::new(PLAYBACK_SAMPLE_RATE)?,
        )?);
        let engine = Arc::new(OpenAiEngine::new(
            api_key,
            llm.base_url.clone(),
            llm.model.clone(),
        )?);
        let interrupt_classifier = Arc::new(ChatInterruptClassifier::new(
            classifier.base_url.clone(),
            classifier.api_key.clone(),
            classifier.model.clone(),
            classifier.prompt.clone(),
            classifier.timeout,
        )?);

        let cancel = CancellationToken::new();
        let busy = BusyFlag::new();
        let interrupt = InterruptSignal::new();

        let (bridge, endpoint) = peer::channel(peer_config.inbound_capacity);
        let link = PeerLink::bind(&peer_config.listen_addr, endpoint).await?;

        let dispatcher = ConversationDispatcher::new(
            dispatch,
            &llm.system_prompt,
            Collaborators {
                engine,
                transcriber: Arc::clone(&transcriber),
                synthesizer,
            },
            bridge.clone(),
            busy,
            interrupt.clone(),
        );
        let handle = dispatcher.handle();

        let snapshot = SpeechSnapshotBuffer::new(voice.snapshot_samples());
        let fast_check = FastCheck::new(
            voice,
            snapshot.clone(),
            transcriber,
            interrupt_classifier,
            interrupt,
            handle.clone(),
        );
        let arbiter = InterruptArbiter::new(voice, fast_check, handle.clone());

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let snapshot_samples = snapshot.capacity();
        let segmenter = VoiceActivitySegmenter::new(build_classifier(voice), voice, event_tx)
            .with_snapshot(snapshot);
        let watcher = PeerWatcher::new(bridge, handle, peer_config.poll_interval);

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_BUFFER);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let stats = segmenter.run(chunk_rx, token).await;
            tracing::debug!(?stats, "segmenter finished");
        }));
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let stats = arbiter.run(event_rx, token).await;
            tracing::debug!(?stats, "arbiter finished");
        }));
        tasks.push(tokio::spawn(dispatcher.run(cancel.clone())));
        tasks.push(tokio::spawn(watcher.run(cancel.clone())));
        tasks.push(tokio::spawn(link.run(cancel.clone())));

        let token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
            token.cancel();
        });

        let mut capture = AudioCapture::new(voice.sample_rate, voice.chunk_samples())?;
        if let Err(e) = capture.start(chunk_tx) {
            cancel.cancel();
            return Err(e);
        }
        tracing::info!(
            sample_rate = voice.sample_rate,
            chunk_ms = voice.chunk_ms,
            vad = ?voice.vad_backend,
            snapshot_samples,
            peer = %peer_config.listen_addr,
            "listening"
        );

        cancel.cancelled().await;
        capture.stop();

        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "task ended abnormally");
            }
        }

        tracing::info!("daemon stopped");
        Ok(())
    }
}
