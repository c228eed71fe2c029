//! Log level ladder and emission helpers.
//!
//! The library emits events through the `log` crate facade; the application
//! installs whatever sink it wants. Each connection carries a [`LogLevel`]
//! threshold that gates emission before the facade is even consulted.

/// Controls what a connection writes to the log sink.
///
/// Levels form a monotone ladder; a connection at `Command` also emits
/// `Warning`, `Error` and `Fatal` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Log nothing.
    #[default]
    Nothing,
    /// Log fatal errors.
    Fatal,
    /// Log all errors.
    Error,
    /// Log errors and warnings.
    Warning,
    /// Log errors, warnings and sent commands.
    Command,
    /// Log errors, warnings, sent commands and additional debug info.
    Debug,
    /// Log everything.
    Verbose,
}

impl LogLevel {
    fn target(self) -> log::Level {
        match self {
            LogLevel::Nothing => log::Level::Error, // unreachable through emit()
            LogLevel::Fatal | LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Command => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Verbose => log::Level::Trace,
        }
    }
}

/// Emit `args` at `level` if `threshold` admits it.
pub(crate) fn emit(threshold: LogLevel, level: LogLevel, args: std::fmt::Arguments<'_>) {
    if level == LogLevel::Nothing || threshold < level {
        return;
    }
    log::log!(target: "pgsql", level.target(), "{}", args);
}

macro_rules! conn_log {
    ($conn:expr, $level:expr, $($arg:tt)*) => {
        crate::logging::emit($conn.log_level, $level, format_args!($($arg)*))
    };
}

pub(crate) use conn_log;
