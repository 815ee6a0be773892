use anyhow::Result;

use crate::channel::Handoff;
use crate::model::MelCompute;
use crate::ring::RingBuffer;

/// First pipeline stage: raw float samples in, scaled mel scalars out.
///
/// Frames are consumed non-overlapping: fewer than `frame_samples`
/// residual samples ever sit in the ring between inference calls.
pub struct MelStage<M> {
    model: M,
    ring: RingBuffer<f32>,
    frame_samples: usize,
}

impl<M: MelCompute> MelStage<M> {
    pub fn new(model: M, frame_samples: usize) -> Self {
        Self {
            model,
            ring: RingBuffer::new(frame_samples * 2),
            frame_samples,
        }
    }

    /// Worker loop. Returns once the input is exhausted and drained,
    /// after propagating exhaustion downstream.
    pub fn run(&mut self, input: &Handoff<f32>, output: &Handoff<f32>) -> Result<()> {
        let mut frame = vec![0.0f32; self.frame_samples];

        loop {
            let samples = input.pull();
            if samples.is_empty() {
                if input.is_exhausted() {
                    break;
                }
                continue;
            }

            self.ring.push(&samples)?;
            while self.ring.len() >= self.frame_samples {
                self.ring.pop(&mut frame)?;
                let mels = self.model.compute(&frame)?;
                output.push(mels);
            }
        }

        output.set_exhausted();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.ring.clear();
    }
}
