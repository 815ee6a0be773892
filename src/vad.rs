use anyhow::{Context, Result};
use ndarray::{Array1, Array2, Array3};
use ort::value::Tensor;
use std::collections::VecDeque;
use std::path::Path;

use crate::model::ModelRunner;
use crate::preprocess::Preprocessor;
use crate::{SAMPLE_RATE, VAD_CHUNK_SIZE, VAD_HIDDEN_DIM};

const SCORE_HISTORY: usize = 125;
const GATE_WINDOW: usize = 3;

/// Silero-based voice activity gate.
///
/// Scores each host frame in 30 ms chunks while threading the model's
/// recurrent h/c state through calls. Frames without recent speech are
/// zeroed so downstream stages see silence instead of being skipped,
/// keeping the audio timeline contiguous.
pub struct VoiceGate {
    runner: ModelRunner,
    h: Array3<f32>,
    c: Array3<f32>,
    sample_rate: i64,
    scores: VecDeque<f32>,
    threshold: f32,
}

impl VoiceGate {
    pub fn load(model_path: &Path, threshold: f32) -> Result<Self> {
        Ok(Self {
            runner: ModelRunner::load(model_path)?,
            h: Array3::zeros((2, 1, VAD_HIDDEN_DIM)),
            c: Array3::zeros((2, 1, VAD_HIDDEN_DIM)),
            sample_rate: SAMPLE_RATE as i64,
            scores: VecDeque::with_capacity(SCORE_HISTORY),
            threshold,
        })
    }

    /// Mean speech probability over the frame's complete 30 ms chunks.
    fn score_frame(&mut self, audio: &[i16]) -> Result<f32> {
        let mut chunk_scores = Vec::new();

        for chunk in audio.chunks_exact(VAD_CHUNK_SIZE) {
            // Silero expects samples normalized to [-1, 1].
            let normalized: Vec<f32> = chunk.iter().map(|&s| s as f32 / 32767.0).collect();
            let input = Array2::from_shape_vec((1, VAD_CHUNK_SIZE), normalized)?;
            let sr = Array1::from_elem(1, self.sample_rate);

            let input_tensor = Tensor::from_array(input)?;
            let sr_tensor = Tensor::from_array(sr)?;
            let h_tensor = Tensor::from_array(self.h.clone())?;
            let c_tensor = Tensor::from_array(self.c.clone())?;

            let outputs = self
                .runner
                .session_mut()
                .run(ort::inputs![input_tensor, sr_tensor, h_tensor, c_tensor])?;

            let score: ndarray::ArrayViewD<f32> = outputs[0]
                .try_extract_array()
                .context("failed to extract VAD output")?;
            let new_h: ndarray::ArrayViewD<f32> = outputs[1]
                .try_extract_array()
                .context("failed to extract VAD h state")?;
            let new_c: ndarray::ArrayViewD<f32> = outputs[2]
                .try_extract_array()
                .context("failed to extract VAD c state")?;

            for layer in 0..2 {
                for dim in 0..VAD_HIDDEN_DIM {
                    self.h[[layer, 0, dim]] = new_h[[layer, 0, dim]];
                    self.c[[layer, 0, dim]] = new_c[[layer, 0, dim]];
                }
            }

            chunk_scores.push(score[[0, 0]]);
        }

        let mean = if chunk_scores.is_empty() {
            0.0
        } else {
            chunk_scores.iter().sum::<f32>() / chunk_scores.len() as f32
        };

        if self.scores.len() >= SCORE_HISTORY {
            self.scores.pop_front();
        }
        self.scores.push_back(mean);
        Ok(mean)
    }

    fn has_recent_speech(&self) -> bool {
        let start = self.scores.len().saturating_sub(GATE_WINDOW);
        self.scores
            .range(start..)
            .copied()
            .fold(0.0f32, f32::max)
            >= self.threshold
    }

    pub fn reset(&mut self) {
        self.h.fill(0.0);
        self.c.fill(0.0);
        self.scores.clear();
    }
}

impl Preprocessor for VoiceGate {
    fn name(&self) -> &str {
        "vad"
    }

    fn process(&mut self, frame: &mut [i16]) -> Result<()> {
        self.score_frame(frame)?;
        if !self.has_recent_speech() {
            frame.fill(0);
        }
        Ok(())
    }
}
