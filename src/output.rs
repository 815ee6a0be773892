use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    Normal,
    Quiet,
    Verbose,
    Json,
}

#[derive(Serialize)]
struct DetectionRecord<'a> {
    wake_word: &'a str,
    score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

/// Serialized detection sink shared by every detector worker.
///
/// The mutex is held for exactly one write+flush, so concurrent
/// detectors never interleave within a line or record.
pub struct EventSink {
    mode: OutputMode,
    show_timestamp: bool,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl EventSink {
    pub fn stdout(mode: OutputMode, show_timestamp: bool) -> Self {
        Self::with_writer(mode, show_timestamp, Box::new(std::io::stdout()))
    }

    pub fn with_writer(
        mode: OutputMode,
        show_timestamp: bool,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            mode,
            show_timestamp,
            writer: Mutex::new(writer),
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Emit one detection event: a bare line, a timestamped line, or a
    /// JSON record depending on the configured mode.
    pub fn emit(&self, wake_word: &str, score: f32) -> Result<()> {
        let mut writer = self.writer.lock().unwrap();
        match self.mode {
            OutputMode::Json => {
                let record = DetectionRecord {
                    wake_word,
                    score,
                    timestamp: self
                        .show_timestamp
                        .then(|| Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
                };
                serde_json::to_writer(&mut *writer, &record)?;
                writeln!(writer)?;
            }
            _ if self.show_timestamp => {
                writeln!(writer, "[{}] {}", Local::now().format("%H:%M:%S"), wake_word)?;
            }
            _ => {
                writeln!(writer, "{wake_word}")?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Per-prediction probability line on stderr, under the same mutex so
    /// debug output never splices into an event.
    pub fn debug_score(&self, wake_word: &str, probability: f32) {
        let _writer = self.writer.lock().unwrap();
        eprintln!("{wake_word} {probability}");
    }
}
