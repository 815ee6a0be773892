use anyhow::Result;
use nnnoiseless::DenoiseState;
use std::collections::VecDeque;

/// In-line audio pre-filter applied to each host frame before the
/// int16-to-float conversion.
pub trait Preprocessor: Send {
    fn name(&self) -> &str;

    /// Transform one frame in place; the frame length never changes.
    fn process(&mut self, frame: &mut [i16]) -> Result<()>;
}

const DENOISE_BLOCK: usize = DenoiseState::FRAME_SIZE;

/// RNNoise denoising over fixed 480-sample blocks.
///
/// Host frames are not multiples of the block size, so samples carry
/// over between calls and the output lags the input by less than one
/// block; the initial deficit is emitted as silence once.
pub struct NoiseSuppressor {
    state: Box<DenoiseState<'static>>,
    pending: VecDeque<f32>,
    denoised: VecDeque<f32>,
}

impl NoiseSuppressor {
    pub fn new() -> Self {
        Self {
            state: DenoiseState::new(),
            pending: VecDeque::new(),
            denoised: VecDeque::new(),
        }
    }
}

impl Default for NoiseSuppressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor for NoiseSuppressor {
    fn name(&self) -> &str {
        "noise-suppression"
    }

    fn process(&mut self, frame: &mut [i16]) -> Result<()> {
        // RNNoise works on raw-magnitude floats, same scale as our ingress.
        self.pending.extend(frame.iter().map(|&s| s as f32));

        let mut block = [0.0f32; DENOISE_BLOCK];
        let mut output = [0.0f32; DENOISE_BLOCK];
        while self.pending.len() >= DENOISE_BLOCK {
            for slot in block.iter_mut() {
                *slot = self.pending.pop_front().unwrap();
            }
            self.state.process_frame(&mut output, &block);
            self.denoised.extend(output.iter().copied());
        }

        let deficit = frame.len().saturating_sub(self.denoised.len());
        for sample in frame[..deficit].iter_mut() {
            *sample = 0;
        }
        for sample in frame[deficit..].iter_mut() {
            let value = self.denoised.pop_front().unwrap_or(0.0);
            *sample = value.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
        Ok(())
    }
}
