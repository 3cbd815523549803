//! Provide tracing, tailored to the test bench.
//!
//! The binary calls [`init_stdout`] once at startup to install a tracing
//! subscriber. Log lines are stamped with simulated time rather than wall
//! time, since wall time says nothing about where in the run an event
//! happened.
//!
//! The rest of the crate can include `use crate::tracing::prelude::*` for
//! convenient access to the `trace!()`, `debug!()`, `info!()`, `warn!()`, and
//! `error!()` macros.

use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

use crate::sim::time;

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

/// Width of the timestamp column, e.g. `" 80000.000ns"`.
const TIME_WIDTH: usize = 13;

// Log to stdout, filtering according to environment variable RUST_LOG,
// overriding the default level (ERROR) to INFO.
pub fn init_stdout() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(SimTimer)
                .with_target(true)
                .fmt_fields(tracing_subscriber::fmt::format::DefaultFields::new())
                .event_format(CustomFormatter),
        )
        .init();
}

/// Custom event formatter that strips the crate prefix, colors the level,
/// and displays fields on a second line for readability.
struct CustomFormatter;

/// Visitor that collects fields into a string buffer.
struct FieldCollector {
    fields: Vec<(String, String)>,
    message: Option<String>,
}

impl FieldCollector {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            message: None,
        }
    }
}

impl tracing::field::Visit for FieldCollector {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            let formatted = format!("{:?}", value);
            // Some("foo") -> foo
            let cleaned = if let Some(inner) = formatted.strip_prefix("Some(") {
                inner.strip_suffix(')').unwrap_or(inner).to_string()
            } else {
                formatted
            };
            self.fields.push((field.name().to_string(), cleaned));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }
}

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for CustomFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let mut visitor = FieldCollector::new();
        event.record(&mut visitor);

        SimTimer.format_time(&mut writer)?;
        write!(writer, " ")?;

        let (level_color, level_text) = match *event.metadata().level() {
            tracing::Level::ERROR => ("\x1b[31m", "ERROR"), // Red
            tracing::Level::WARN => ("\x1b[33m", "WARN "),  // Yellow
            tracing::Level::INFO => ("\x1b[32m", "INFO "),  // Green
            tracing::Level::DEBUG => ("\x1b[34m", "DEBUG"), // Blue
            tracing::Level::TRACE => ("\x1b[35m", "TRACE"), // Magenta
        };
        write!(writer, "{}{}\x1b[0m ", level_color, level_text)?;

        // Our own targets lose the crate prefix; dependencies keep theirs.
        let target = event.metadata().target();
        let short_target = target.strip_prefix("miner_tb::").unwrap_or(target);
        write!(writer, "{}: ", short_target)?;

        if let Some(ref msg) = visitor.message {
            write!(writer, "{}", msg.trim_matches('"'))?;
        }

        if !visitor.fields.is_empty() {
            writeln!(writer)?;
            // Align with the target column: timestamp, space, level, space.
            write!(writer, "\x1b[90m{:width$}", "", width = TIME_WIDTH + 7)?;
            for (i, (key, value)) in visitor.fields.iter().enumerate() {
                if i > 0 {
                    write!(writer, ", ")?;
                }
                write!(writer, "{}={}", key, value.trim_matches('"'))?;
            }
            write!(writer, "\x1b[0m")?;
        }

        writeln!(writer)
    }
}

/// Stamps events with the current simulated time.
struct SimTimer;

impl FormatTime for SimTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{:>width$}", time::now(), width = TIME_WIDTH)
    }
}
