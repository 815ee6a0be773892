//! End-to-end tests over the real stage runners and channels, with
//! deterministic stand-ins for the three neural models.

use anyhow::Result;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use wakestream::channel::Handoff;
use wakestream::config::WakeWordConfig;
use wakestream::detector::DetectorStage;
use wakestream::embedding::EmbeddingStage;
use wakestream::mel::MelStage;
use wakestream::model::{EmbeddingCompute, KeywordScore, MelCompute};
use wakestream::output::{EventSink, OutputMode};
use wakestream::{
    CHUNK_SAMPLES, EMBEDDING_FEATURES, EMBEDDING_STEP_SIZE, EMBEDDING_WINDOW_SIZE, MELS_PER_CHUNK,
    NUM_MELS, WAKEWORD_FEATURES,
};

const STEP_FRAMES: usize = 4;
const FRAME_SAMPLES: usize = STEP_FRAMES * CHUNK_SAMPLES;
const MELS_PER_FRAME: usize = STEP_FRAMES * MELS_PER_CHUNK;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Mel stand-in with the real output cardinality: 5 mel frames per 80 ms
/// chunk, each mel scalar carrying its global mel-frame index.
struct StubMel {
    calls: Arc<AtomicUsize>,
    frames_out: usize,
}

impl MelCompute for StubMel {
    fn compute(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        assert_eq!(samples.len(), FRAME_SAMPLES);
        self.calls.fetch_add(1, Ordering::SeqCst);

        let frames = (samples.len() / CHUNK_SAMPLES) * MELS_PER_CHUNK;
        let mut out = Vec::with_capacity(frames * NUM_MELS);
        for _ in 0..frames {
            out.extend(std::iter::repeat(self.frames_out as f32).take(NUM_MELS));
            self.frames_out += 1;
        }
        Ok(out)
    }
}

/// Embedding stand-in: every vector is filled with its invocation index,
/// so downstream windows reveal exactly which embeddings they hold.
struct StubEmbedding {
    calls: Arc<AtomicUsize>,
}

impl EmbeddingCompute for StubEmbedding {
    fn extract(&mut self, mels: &[f32]) -> Result<Vec<f32>> {
        assert_eq!(mels.len(), EMBEDDING_WINDOW_SIZE * NUM_MELS);
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![index as f32; EMBEDDING_FEATURES])
    }
}

/// Keyword stand-in scoring high whenever the newest embedding in the
/// window falls in a configured "hot" index range, like a keyword
/// locked to a span of the audio timeline.
struct StubKeyword {
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<f32>>>,
    hot: Vec<Range<usize>>,
}

impl KeywordScore for StubKeyword {
    fn predict(&mut self, features: &[f32]) -> Result<f32> {
        assert_eq!(features.len(), WAKEWORD_FEATURES * EMBEDDING_FEATURES);
        self.calls.fetch_add(1, Ordering::SeqCst);

        let newest = features[features.len() - 1];
        self.seen.lock().unwrap().push(newest);

        let index = newest as usize;
        let is_hot = self.hot.iter().any(|range| range.contains(&index));
        Ok(if is_hot { 0.9 } else { 0.1 })
    }
}

#[derive(Clone)]
struct DetectorSpec {
    hot: Vec<Range<usize>>,
    threshold: f32,
    trigger_level: i32,
    refractory_steps: i32,
}

impl Default for DetectorSpec {
    fn default() -> Self {
        Self {
            hot: Vec::new(),
            threshold: 0.5,
            trigger_level: 4,
            refractory_steps: 20,
        }
    }
}

struct RunResult {
    mel_calls: usize,
    embedding_calls: usize,
    keyword_calls: Vec<usize>,
    seen_embeddings: Vec<Vec<f32>>,
    events: Vec<String>,
}

/// Wire the real stages across real threads, feed `audio_samples` of
/// silence in `push_batch`-sized pushes, exhaust, and join everything.
fn run_pipeline(audio_samples: usize, push_batch: usize, specs: &[DetectorSpec]) -> RunResult {
    let audio_channel: Arc<Handoff<f32>> = Arc::new(Handoff::new());
    let mel_channel: Arc<Handoff<f32>> = Arc::new(Handoff::new());
    let feature_channels: Vec<Arc<Handoff<f32>>> =
        specs.iter().map(|_| Arc::new(Handoff::new())).collect();

    let buf = SharedBuf::default();
    let sink = Arc::new(EventSink::with_writer(
        OutputMode::Normal,
        false,
        Box::new(buf.clone()),
    ));

    let mel_calls = Arc::new(AtomicUsize::new(0));
    let embedding_calls = Arc::new(AtomicUsize::new(0));
    let keyword_calls: Vec<Arc<AtomicUsize>> =
        specs.iter().map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let seen: Vec<Arc<Mutex<Vec<f32>>>> = specs
        .iter()
        .map(|_| Arc::new(Mutex::new(Vec::new())))
        .collect();

    let mel_worker = {
        let mut stage = MelStage::new(
            StubMel {
                calls: Arc::clone(&mel_calls),
                frames_out: 0,
            },
            FRAME_SAMPLES,
        );
        let input = Arc::clone(&audio_channel);
        let output = Arc::clone(&mel_channel);
        thread::spawn(move || stage.run(&input, &output).unwrap())
    };

    let embedding_worker = {
        let mut stage = EmbeddingStage::new(
            StubEmbedding {
                calls: Arc::clone(&embedding_calls),
            },
            MELS_PER_FRAME * NUM_MELS,
        );
        let input = Arc::clone(&mel_channel);
        let outputs: Vec<Arc<Handoff<f32>>> = feature_channels.iter().map(Arc::clone).collect();
        thread::spawn(move || stage.run(&input, &outputs).unwrap())
    };

    let detector_workers: Vec<_> = specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let config = WakeWordConfig {
                model_path: PathBuf::from("stub.onnx"),
                threshold: spec.threshold,
                trigger_level: spec.trigger_level,
                refractory_steps: spec.refractory_steps,
                debug: false,
            };
            let model = StubKeyword {
                calls: Arc::clone(&keyword_calls[i]),
                seen: Arc::clone(&seen[i]),
                hot: spec.hot.clone(),
            };
            let mut stage =
                DetectorStage::new(format!("keyword_{i}"), model, &config, Arc::clone(&sink));
            let channel = Arc::clone(&feature_channels[i]);
            thread::spawn(move || stage.run(&channel).unwrap())
        })
        .collect();

    let mut remaining = audio_samples;
    while remaining > 0 {
        let n = remaining.min(push_batch);
        audio_channel.push(vec![0.0f32; n]);
        remaining -= n;
    }
    audio_channel.set_exhausted();

    mel_worker.join().unwrap();
    embedding_worker.join().unwrap();
    for worker in detector_workers {
        worker.join().unwrap();
    }

    assert!(audio_channel.is_exhausted());
    assert!(mel_channel.is_exhausted());
    for channel in &feature_channels {
        assert!(channel.is_exhausted());
    }

    RunResult {
        mel_calls: mel_calls.load(Ordering::SeqCst),
        embedding_calls: embedding_calls.load(Ordering::SeqCst),
        keyword_calls: keyword_calls
            .iter()
            .map(|c| c.load(Ordering::SeqCst))
            .collect(),
        seen_embeddings: seen.iter().map(|s| s.lock().unwrap().clone()).collect(),
        events: buf.contents().lines().map(String::from).collect(),
    }
}

fn expected_embeddings(mel_frames: usize) -> usize {
    if mel_frames >= EMBEDDING_WINDOW_SIZE {
        1 + (mel_frames - EMBEDDING_WINDOW_SIZE) / EMBEDDING_STEP_SIZE
    } else {
        0
    }
}

fn expected_predictions(embeddings: usize) -> usize {
    embeddings.saturating_sub(WAKEWORD_FEATURES - 1)
}

#[test]
fn stage_invocation_counts_follow_the_window_arithmetic() {
    let frames = 34;
    // Irregular pushes prove the mel ring re-frames the stream.
    let result = run_pipeline(frames * FRAME_SAMPLES, 1000, &[DetectorSpec::default()]);

    assert_eq!(result.mel_calls, frames);
    let mel_frames = frames * MELS_PER_FRAME;
    assert_eq!(result.embedding_calls, expected_embeddings(mel_frames));
    assert_eq!(
        result.keyword_calls[0],
        expected_predictions(result.embedding_calls)
    );
    assert!(result.events.is_empty());
}

#[test]
fn residual_shorter_than_a_frame_is_discarded() {
    let result = run_pipeline(
        3 * FRAME_SAMPLES + FRAME_SAMPLES - 1,
        FRAME_SAMPLES,
        &[DetectorSpec::default()],
    );
    assert_eq!(result.mel_calls, 3);
}

#[test]
fn zero_length_input_shuts_down_cleanly_with_no_output() {
    let result = run_pipeline(0, FRAME_SAMPLES, &[DetectorSpec::default()]);
    assert_eq!(result.mel_calls, 0);
    assert_eq!(result.embedding_calls, 0);
    assert_eq!(result.keyword_calls[0], 0);
    assert!(result.events.is_empty());
}

#[test]
fn input_shorter_than_one_frame_never_reaches_the_models() {
    let result = run_pipeline(FRAME_SAMPLES - 1, 512, &[DetectorSpec::default()]);
    assert_eq!(result.mel_calls, 0);
    assert_eq!(result.embedding_calls, 0);
    assert!(result.events.is_empty());
}

#[test]
fn every_detector_observes_the_identical_embedding_sequence() {
    let specs = vec![DetectorSpec::default(), DetectorSpec::default()];
    let result = run_pipeline(40 * FRAME_SAMPLES, FRAME_SAMPLES, &specs);

    assert_eq!(result.keyword_calls[0], result.keyword_calls[1]);
    assert!(!result.seen_embeddings[0].is_empty());
    assert_eq!(result.seen_embeddings[0], result.seen_embeddings[1]);
}

#[test]
fn a_sustained_hot_span_triggers_exactly_once() {
    // 34 frames of audio produce 76 embeddings; predictions see newest
    // embedding indexes 15..=75. Twenty hot steps with trigger level 4
    // fire on the fourth and then sit inside the refractory period.
    let spec = DetectorSpec {
        hot: vec![30..50],
        ..DetectorSpec::default()
    };
    let result = run_pipeline(34 * FRAME_SAMPLES, FRAME_SAMPLES, &[spec]);

    assert_eq!(result.events, vec!["keyword_0"]);
}

#[test]
fn a_second_utterance_after_the_refractory_period_triggers_again() {
    let spec = DetectorSpec {
        hot: vec![20..28, 45..53],
        refractory_steps: 5,
        ..DetectorSpec::default()
    };
    let result = run_pipeline(34 * FRAME_SAMPLES, FRAME_SAMPLES, &[spec]);

    assert_eq!(result.events, vec!["keyword_0", "keyword_0"]);
}

#[test]
fn a_back_to_back_second_utterance_is_suppressed() {
    // The second hot span lands entirely inside the 20-step refractory
    // window opened by the first detection.
    let spec = DetectorSpec {
        hot: vec![20..28, 30..38],
        ..DetectorSpec::default()
    };
    let result = run_pipeline(34 * FRAME_SAMPLES, FRAME_SAMPLES, &[spec]);

    assert_eq!(result.events, vec!["keyword_0"]);
}

#[test]
fn detectors_fire_independently() {
    let hot_spec = DetectorSpec {
        hot: vec![20..40],
        ..DetectorSpec::default()
    };
    let cold_spec = DetectorSpec::default();
    let result = run_pipeline(
        34 * FRAME_SAMPLES,
        FRAME_SAMPLES,
        &[hot_spec, cold_spec],
    );

    assert_eq!(result.events, vec!["keyword_0"]);
}

#[test]
fn identical_runs_produce_identical_detections() {
    let spec = DetectorSpec {
        hot: vec![20..28, 45..53],
        refractory_steps: 5,
        ..DetectorSpec::default()
    };

    let first = run_pipeline(40 * FRAME_SAMPLES, 999, std::slice::from_ref(&spec));
    let second = run_pipeline(40 * FRAME_SAMPLES, 999, std::slice::from_ref(&spec));

    assert_eq!(first.events, second.events);
    assert_eq!(first.mel_calls, second.mel_calls);
    assert_eq!(first.embedding_calls, second.embedding_calls);
    assert_eq!(first.keyword_calls, second.keyword_calls);
    assert_eq!(first.seen_embeddings, second.seen_embeddings);
}
