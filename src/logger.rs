// Terminal logging for the engine.
// Every subsystem logs through four severity macros. Lines go to stderr
// so machine output (doctor JSON, error objects) stays clean on stdout.
// Rendering is centralized in `emit`, gated by a level threshold set once
// at startup from --debug. Installs spend their time in downloads,
// extractions and command sets, so debug lines carry the seconds elapsed
// since startup; a `--debug` transcript doubles as a coarse profile.

use colored::*;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

// `log_info!` for normal engine progress.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => ($crate::logger::emit($crate::logger::Level::Info, format_args!($($arg)*)));
}

// `log_warn!` for conditions the run can survive.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => ($crate::logger::emit($crate::logger::Level::Warn, format_args!($($arg)*)));
}

// `log_error!` for failures that abort a resource or the run.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => ($crate::logger::emit($crate::logger::Level::Error, format_args!($($arg)*)));
}

// `log_debug!` for internal tracing; dropped below the Debug threshold.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => ($crate::logger::emit($crate::logger::Level::Debug, format_args!($($arg)*)));
}

/// Severities, most to least urgent. The threshold defaults to `Info`;
/// `--debug` raises it to `Debug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

// Current threshold; levels above it are dropped.
static THRESHOLD: AtomicU8 = AtomicU8::new(Level::Info as u8);
// Startup instant, for the elapsed prefix on debug lines.
static STARTED: OnceLock<Instant> = OnceLock::new();

/// Configures the logger. Call once, at startup, before any engine work.
pub fn init(debug: bool) {
    STARTED.get_or_init(Instant::now);
    let threshold = if debug { Level::Debug } else { Level::Info };
    THRESHOLD.store(threshold as u8, Ordering::Relaxed);
    if debug {
        emit(Level::Debug, format_args!("[Log] debug output enabled"));
    }
}

/// Whether lines at `level` currently pass the threshold.
pub fn enabled(level: Level) -> bool {
    level as u8 <= THRESHOLD.load(Ordering::Relaxed)
}

/// Renders one line. The macros call this; it is not meant for direct
/// use outside them.
pub fn emit(level: Level, args: std::fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    match level {
        Level::Error => eprintln!("{} {}", "[ERROR]".bright_red(), args),
        Level::Warn => eprintln!("{} {}", "[WARN]".bright_yellow(), args),
        Level::Info => eprintln!("{} {}", "[INFO]".bright_green(), args),
        Level::Debug => {
            let elapsed = STARTED
                .get()
                .map(|started| started.elapsed().as_secs_f64())
                .unwrap_or_default();
            eprintln!(
                "{} {} {}",
                "[DEBUG]".dimmed(),
                format!("{elapsed:8.3}s").dimmed(),
                args
            );
        }
    }
}
