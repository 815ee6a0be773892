//! Stderr logging in the `[LOG]` / `[WARNING]` / `[ERROR]` line format.

use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::output::OutputMode;

struct BracketFormat;

impl<S, N> FormatEvent<S, N> for BracketFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let label = match *event.metadata().level() {
            Level::ERROR => "[ERROR]",
            Level::WARN => "[WARNING]",
            _ => "[LOG]",
        };
        write!(writer, "{label} ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber. Detection events own stdout, so all
/// diagnostics go to stderr; `--quiet` keeps errors only and
/// `--verbose` opens up debug lines.
pub fn init(mode: OutputMode) {
    let level = match mode {
        OutputMode::Quiet => Level::ERROR,
        OutputMode::Verbose => Level::DEBUG,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .event_format(BracketFormat)
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
}
