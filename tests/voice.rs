//! Voice pipeline integration tests
//!
//! Tests segmentation and snapshots without requiring audio hardware

use std::io::Cursor;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use duet_voice::config::VoiceConfig;
use duet_voice::voice::{
    EnergyClassifier, SAMPLE_RATE, SegmenterEvent, SpeechSegment, SpeechSnapshotBuffer,
    VoiceActivitySegmenter, samples_to_wav,
};

mod common;

use common::{CHUNK_SAMPLES, chunk};

fn segmenter(
    config: &VoiceConfig,
) -> (
    VoiceActivitySegmenter<EnergyClassifier>,
    mpsc::UnboundedReceiver<SegmenterEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let seg = VoiceActivitySegmenter::new(EnergyClassifier::new(config.vad_threshold), config, tx);
    (seg, rx)
}

fn sealed(rx: &mut mpsc::UnboundedReceiver<SegmenterEvent>) -> Vec<SpeechSegment> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SegmenterEvent::SpeechEnd { segment } = event {
            out.push(segment);
        }
    }
    out
}

#[test]
fn test_idle_utterance_becomes_one_segment() {
    let config = VoiceConfig::default();
    assert_eq!(config.chunk_samples(), CHUNK_SAMPLES);
    let (mut seg, mut rx) = segmenter(&config);

    // 10 silent, 38 speech (~1.2s), 25 silent (800ms)
    let mut seq = 0;
    for speech in [false; 10].into_iter().chain([true; 38]).chain([false; 25]) {
        seg.process(chunk(seq, speech));
        seq += 1;
    }

    let segments = sealed(&mut rx);
    assert_eq!(segments.len(), 1);
    let segment = &segments[0];
    assert_eq!(segment.turn(), 1);
    assert_eq!(segment.lookback_len(), config.lookback_chunks);

    // lookback + speech + trailing silence, contiguous and in order
    let seqs: Vec<u64> = segment.chunks().iter().map(|c| c.seq()).collect();
    let expected: Vec<u64> = (5..73).collect();
    assert_eq!(seqs, expected);

    let speech_secs = 38.0 * CHUNK_SAMPLES as f32 / SAMPLE_RATE as f32;
    assert!((speech_secs - 1.2).abs() < 0.05);
    assert_eq!(segment.sample_count(), 68 * CHUNK_SAMPLES);
}

#[test]
fn test_silence_exactly_at_threshold_seals() {
    let config = VoiceConfig {
        silence_ms: 320,
        ..VoiceConfig::default()
    };
    let (mut seg, mut rx) = segmenter(&config);

    let mut seq = 0;
    for _ in 0..5 {
        seg.process(chunk(seq, true));
        seq += 1;
    }
    // 9 x 32ms = 288ms, still open
    for _ in 0..9 {
        seg.process(chunk(seq, false));
        seq += 1;
    }
    assert!(sealed(&mut rx).is_empty());

    // 10 x 32ms = 320ms, sealed
    seg.process(chunk(seq, false));
    assert_eq!(sealed(&mut rx).len(), 1);
}

#[test]
fn test_brief_pauses_do_not_split() {
    let config = VoiceConfig::default();
    let (mut seg, mut rx) = segmenter(&config);

    let mut seq = 0;
    for _ in 0..3 {
        for _ in 0..10 {
            seg.process(chunk(seq, true));
            seq += 1;
        }
        for _ in 0..12 {
            seg.process(chunk(seq, false));
            seq += 1;
        }
    }
    assert!(sealed(&mut rx).is_empty());
    assert_eq!(seg.stats().segments_opened, 1);
}

#[test]
fn test_snapshot_tracks_raw_audio() {
    let config = VoiceConfig::default();
    let snapshot = SpeechSnapshotBuffer::new(config.snapshot_samples());
    let (seg, _rx) = segmenter(&config);
    let mut seg = seg.with_snapshot(snapshot.clone());

    // silence is recorded too, and old audio falls out of the window
    for seq in 0..100 {
        seg.process(chunk(seq, seq % 2 == 0));
    }

    assert_eq!(snapshot.snapshot().len(), config.snapshot_samples());
    assert_eq!(snapshot.snapshot_last(CHUNK_SAMPLES).len(), CHUNK_SAMPLES);
}

#[tokio::test]
async fn test_segmenter_task_stops_on_cancel() {
    let config = VoiceConfig::default();
    let (seg, mut events) = segmenter(&config);
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(seg.run(rx, cancel.clone()));

    for seq in 0..20 {
        tx.send(chunk(seq, true)).await.unwrap();
    }
    let first = events.recv().await.unwrap();
    assert!(matches!(first, SegmenterEvent::SpeechStart { turn: 1 }));

    cancel.cancel();
    let stats = task.await.unwrap();
    assert_eq!(stats.segments_opened, 1);
    assert_eq!(stats.segments_sealed, 0);
}

#[test]
fn test_segment_wav_encoding() {
    let samples: Vec<f32> = (0..SAMPLE_RATE as usize / 10)
        .map(|i| (i as f32 * 0.01).sin() * 0.5)
        .collect();
    let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(reader.len() as usize, samples.len());
}
