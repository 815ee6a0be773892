use anyhow::{bail, Context, Result};
use ndarray::{Array2, Array3, Array4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::{EMBEDDING_FEATURES, EMBEDDING_WINDOW_SIZE, NUM_MELS, WAKEWORD_FEATURES};

/// Audio samples in, mel-spectrogram scalars out.
pub trait MelCompute: Send {
    fn compute(&mut self, samples: &[f32]) -> Result<Vec<f32>>;
}

/// One mel window in, one embedding vector out.
pub trait EmbeddingCompute: Send {
    fn extract(&mut self, mels: &[f32]) -> Result<Vec<f32>>;
}

/// One embedding window in, one probability out.
pub trait KeywordScore: Send {
    fn predict(&mut self, features: &[f32]) -> Result<f32>;
}

/// Affine post-scale applied to raw mel output before the embedding model.
///
/// The default matches what the pretrained speech embedding expects; kept
/// configurable because other mel-model variants may not want it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MelScale {
    pub divisor: f32,
    pub offset: f32,
}

impl Default for MelScale {
    fn default() -> Self {
        Self {
            divisor: 10.0,
            offset: 2.0,
        }
    }
}

impl MelScale {
    fn apply(&self, value: f32) -> f32 {
        value / self.divisor + self.offset
    }
}

/// Session plus the input/output name tables cached at load time.
pub struct ModelRunner {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl ModelRunner {
    pub fn load(model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?
            .with_inter_threads(1)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load model {}", model_path.display()))?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|input| input.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|output| output.name().to_string())
            .collect();
        debug!(
            "loaded {}: inputs {:?}, outputs {:?}",
            model_path.display(),
            input_names,
            output_names
        );

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

/// Mel spectrogram model: `[1, frame_samples]` audio to scaled mel scalars.
pub struct MelModel {
    runner: ModelRunner,
    scale: MelScale,
}

impl MelModel {
    pub fn load(model_path: &Path, scale: MelScale) -> Result<Self> {
        Ok(Self {
            runner: ModelRunner::load(model_path)?,
            scale,
        })
    }
}

impl MelCompute for MelModel {
    fn compute(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let scale = self.scale;
        let input = Array2::from_shape_vec((1, samples.len()), samples.to_vec())?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self.runner.session_mut().run(ort::inputs![tensor])?;
        let output: ndarray::ArrayViewD<f32> = outputs[0]
            .try_extract_array()
            .context("failed to extract mel spectrogram output")?;

        let count = output.len();
        if count == 0 || count % NUM_MELS != 0 {
            bail!("mel model returned {count} values, expected a positive multiple of {NUM_MELS}");
        }

        Ok(output.iter().map(|&v| scale.apply(v)).collect())
    }
}

/// Speech embedding model: `[batch, 76, 32, 1]` mels to 96-float vectors.
pub struct EmbeddingModel {
    runner: ModelRunner,
}

impl EmbeddingModel {
    pub fn load(model_path: &Path) -> Result<Self> {
        Ok(Self {
            runner: ModelRunner::load(model_path)?,
        })
    }

    /// Batched variant; the streaming pipeline calls it with batch 1.
    pub fn extract_batch(&mut self, mels: &[f32], batch: usize) -> Result<Vec<f32>> {
        let expected = batch * EMBEDDING_WINDOW_SIZE * NUM_MELS;
        if mels.len() != expected {
            bail!(
                "embedding input held {} mel values, expected {expected}",
                mels.len()
            );
        }

        let input = Array4::from_shape_vec(
            (batch, EMBEDDING_WINDOW_SIZE, NUM_MELS, 1),
            mels.to_vec(),
        )?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self.runner.session_mut().run(ort::inputs![tensor])?;
        let output: ndarray::ArrayViewD<f32> = outputs[0]
            .try_extract_array()
            .context("failed to extract embedding output")?;

        if output.len() != batch * EMBEDDING_FEATURES {
            bail!(
                "embedding model returned {} values, expected {}",
                output.len(),
                batch * EMBEDDING_FEATURES
            );
        }

        Ok(output.iter().copied().collect())
    }
}

impl EmbeddingCompute for EmbeddingModel {
    fn extract(&mut self, mels: &[f32]) -> Result<Vec<f32>> {
        self.extract_batch(mels, 1)
    }
}

/// Keyword classifier: `[1, 16, 96]` features to a single probability.
pub struct KeywordModel {
    name: String,
    runner: ModelRunner,
}

impl KeywordModel {
    pub fn load(model_path: &Path) -> Result<Self> {
        let name = model_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "wakeword".to_string());
        Ok(Self {
            name,
            runner: ModelRunner::load(model_path)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl KeywordScore for KeywordModel {
    fn predict(&mut self, features: &[f32]) -> Result<f32> {
        let expected = WAKEWORD_FEATURES * EMBEDDING_FEATURES;
        if features.len() != expected {
            bail!(
                "keyword input held {} features, expected {expected}",
                features.len()
            );
        }

        let input = Array3::from_shape_vec(
            (1, WAKEWORD_FEATURES, EMBEDDING_FEATURES),
            features.to_vec(),
        )?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self.runner.session_mut().run(ort::inputs![tensor])?;
        let output: ndarray::ArrayViewD<f32> = outputs[0]
            .try_extract_array()
            .context("failed to extract keyword output")?;

        // Classifier heads differ in rank across exported models.
        let score = match output.shape().len() {
            3 => output[[0, 0, 0]],
            2 => output[[0, 0]],
            _ => output[[0]],
        };
        Ok(score)
    }
}
