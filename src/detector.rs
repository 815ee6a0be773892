use anyhow::Result;
use std::sync::Arc;

use crate::channel::Handoff;
use crate::config::WakeWordConfig;
use crate::model::KeywordScore;
use crate::output::EventSink;
use crate::ring::RingBuffer;
use crate::{EMBEDDING_FEATURES, WAKEWORD_FEATURES};

/// Debounce state machine turning a noisy probability stream into
/// single-shot triggers.
///
/// Each above-threshold prediction advances the count by one; each miss
/// only decays it by one, so a run where hits outnumber misses by
/// `trigger_level` fires. After a trigger the count jumps to
/// `-refractory_steps` and has to climb back to zero one prediction at a
/// time before it can go positive again.
pub struct Activation {
    count: i32,
    threshold: f32,
    trigger_level: i32,
    refractory_steps: i32,
}

impl Activation {
    pub fn new(threshold: f32, trigger_level: i32, refractory_steps: i32) -> Self {
        Self {
            count: 0,
            threshold,
            trigger_level,
            refractory_steps,
        }
    }

    /// Feed one prediction; true when it fires a trigger.
    pub fn observe(&mut self, probability: f32) -> bool {
        if probability > self.threshold {
            self.count += 1;
            if self.count >= self.trigger_level {
                self.count = -self.refractory_steps;
                return true;
            }
        } else if self.count > 0 {
            self.count -= 1;
        } else if self.count < 0 {
            self.count += 1;
        }
        false
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// Final pipeline stage, one per configured keyword: embedding vectors
/// in, detection events out through the shared serialized sink.
pub struct DetectorStage<K> {
    name: String,
    model: K,
    ring: RingBuffer<f32>,
    activation: Activation,
    debug: bool,
    sink: Arc<EventSink>,
}

impl<K: KeywordScore> DetectorStage<K> {
    pub fn new(name: String, model: K, config: &WakeWordConfig, sink: Arc<EventSink>) -> Self {
        Self {
            name,
            model,
            ring: RingBuffer::new(WAKEWORD_FEATURES * EMBEDDING_FEATURES * 2),
            activation: Activation::new(
                config.threshold,
                config.trigger_level,
                config.refractory_steps,
            ),
            debug: config.debug,
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&mut self, input: &Handoff<f32>) -> Result<()> {
        let window_len = WAKEWORD_FEATURES * EMBEDDING_FEATURES;
        let mut window = vec![0.0f32; window_len];

        loop {
            let features = input.pull();
            if features.is_empty() {
                if input.is_exhausted() {
                    break;
                }
                continue;
            }

            self.ring.push(&features)?;
            while self.ring.len() / EMBEDDING_FEATURES >= WAKEWORD_FEATURES {
                self.ring.peek(&mut window, 0)?;
                let probability = self.model.predict(&window)?;

                if self.debug {
                    self.sink.debug_score(&self.name, probability);
                }
                if self.activation.observe(probability) {
                    self.sink.emit(&self.name, probability)?;
                }

                // Slide by one embedding.
                self.ring.skip(EMBEDDING_FEATURES)?;
            }
        }

        Ok(())
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.activation.reset();
    }
}
