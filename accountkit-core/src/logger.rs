//! Bridge from `tracing` events to a host-provided log sink.

use std::{
    fmt::{self, Write as _},
    sync::{Arc, OnceLock},
};

use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_subscriber::{
    layer::{Context, SubscriberExt as _},
    util::SubscriberInitExt as _,
    Layer,
};

/// Trait representing a logger that can log messages at various levels.
///
/// This trait should be implemented by any host that wants to receive the
/// core's log messages, for example a contract runtime that owns its own log
/// channel.
///
/// # Examples
///
/// Implementing the `Logger` trait:
///
/// ```rust
/// use accountkit_core::logger::{Logger, LogLevel};
///
/// struct MyLogger;
///
/// impl Logger for MyLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         println!("[{:?}] {}", level, message);
///     }
/// }
/// ```
pub trait Logger: Sync + Send {
    /// Logs a message at the specified log level.
    ///
    /// # Arguments
    ///
    /// * `level` - The severity level of the log message.
    /// * `message` - The log message to be recorded.
    fn log(&self, level: LogLevel, message: String);
}

/// Enumeration of possible log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Designates very low priority, often extremely detailed messages.
    Trace,
    /// Designates lower priority debugging information.
    Debug,
    /// Designates informational messages that highlight the progress of the application.
    Info,
    /// Designates potentially harmful situations.
    Warn,
    /// Designates error events that might still allow the application to continue running.
    Error,
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        if level == Level::ERROR {
            Self::Error
        } else if level == Level::WARN {
            Self::Warn
        } else if level == Level::INFO {
            Self::Info
        } else if level == Level::DEBUG {
            Self::Debug
        } else {
            Self::Trace
        }
    }
}

/// A layer that forwards events to the user-provided `Logger` implementation.
struct ForeignLoggerLayer;

impl<S: Subscriber> Layer<S> for ForeignLoggerLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let is_event_from_accountkit = metadata.target().starts_with("accountkit");
        let is_debug_or_trace_level =
            *metadata.level() == Level::DEBUG || *metadata.level() == Level::TRACE;

        // Skip Debug or Trace events that are not from this crate.
        if is_debug_or_trace_level && !is_event_from_accountkit {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(LogLevel::from(*metadata.level()), visitor.finish());
        } else {
            eprintln!("Logger not set: {}", visitor.finish());
        }
    }
}

/// Flattens an event into `message key=value ...`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

/// A global instance of the user-provided logger.
static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Sets the global logger.
///
/// Installs a `tracing` subscriber that forwards every event from this
/// crate, and every info-or-higher event from elsewhere, to `logger`. It
/// should be called once, before any logging occurs.
///
/// # Note
///
/// If the logger has already been set, this function will print a message and do nothing.
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        println!("Logger already set");
        return;
    }

    if let Err(e) = tracing_subscriber::registry()
        .with(ForeignLoggerLayer)
        .try_init()
    {
        eprintln!("Failed to set logger: {e}");
    }
}
