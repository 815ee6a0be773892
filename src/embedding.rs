use anyhow::Result;
use std::sync::Arc;

use crate::channel::Handoff;
use crate::model::EmbeddingCompute;
use crate::ring::RingBuffer;
use crate::{EMBEDDING_STEP_SIZE, EMBEDDING_WINDOW_SIZE, NUM_MELS};

/// Second pipeline stage: mel scalars in, embedding vectors fanned out to
/// every keyword detector.
///
/// The window slides: consecutive 76-frame windows overlap by 68 mel
/// frames, so the ring is read with `peek` and advanced with `skip`.
pub struct EmbeddingStage<E> {
    model: E,
    ring: RingBuffer<f32>,
}

impl<E: EmbeddingCompute> EmbeddingStage<E> {
    /// `max_batch_mels` is the largest batch the mel stage can push at
    /// once; the ring must fit it on top of one unconsumed window.
    pub fn new(model: E, max_batch_mels: usize) -> Self {
        Self {
            model,
            ring: RingBuffer::new(EMBEDDING_WINDOW_SIZE * NUM_MELS + max_batch_mels),
        }
    }

    pub fn run(&mut self, input: &Handoff<f32>, outputs: &[Arc<Handoff<f32>>]) -> Result<()> {
        let mut window = vec![0.0f32; EMBEDDING_WINDOW_SIZE * NUM_MELS];

        loop {
            let mels = input.pull();
            if mels.is_empty() {
                if input.is_exhausted() {
                    break;
                }
                continue;
            }

            self.ring.push(&mels)?;
            while self.ring.len() / NUM_MELS >= EMBEDDING_WINDOW_SIZE {
                self.ring.peek(&mut window, 0)?;
                let embedding = self.model.extract(&window)?;

                // Fan out by value: each detector owns its copy.
                for output in outputs {
                    output.push(embedding.clone());
                }

                self.ring.skip(EMBEDDING_STEP_SIZE * NUM_MELS)?;
            }
        }

        for output in outputs {
            output.set_exhausted();
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.ring.clear();
    }
}
