// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process-wide debug level gate, ported from mempool.c's `debug` global and
// `dbg()` macro. Forwards accepted records through the `log` facade instead
// of `printf` so a host binary picks the backend (env_logger, etc.).

use std::sync::atomic::{AtomicI32, Ordering};

/// Verbosity levels, high to low, matching `MEMPOOL_PRINT_LEVEL_*` in the
/// original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum DebugLevel {
    Emerg = -1,
    Verbose = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
}

impl DebugLevel {
    fn as_log_level(self) -> log::Level {
        match self {
            DebugLevel::Emerg => log::Level::Error,
            DebugLevel::Warning => log::Level::Warn,
            DebugLevel::Info => log::Level::Info,
            DebugLevel::Verbose => log::Level::Trace,
            DebugLevel::Debug => log::Level::Debug,
        }
    }
}

static DEBUG_LEVEL: AtomicI32 = AtomicI32::new(DebugLevel::Emerg as i32);

/// Set the process-wide debug level. A record at `record_level` is emitted
/// iff `debug_level > record_level` — matches the original `dbg()` gate, so
/// the default (`Emerg`) emits nothing since nothing can exceed it.
pub fn set_debug_level(level: DebugLevel) {
    DEBUG_LEVEL.store(level as i32, Ordering::Relaxed);
}

fn current_level() -> i32 {
    DEBUG_LEVEL.load(Ordering::Relaxed)
}

/// Emit `args` at `record_level` if the current debug level permits it.
pub(crate) fn emit(record_level: DebugLevel, args: std::fmt::Arguments) {
    if current_level() > record_level as i32 {
        log::log!(record_level.as_log_level(), "{}", args);
    }
}

macro_rules! pr_debug {
    ($($arg:tt)*) => {
        $crate::diag::emit($crate::diag::DebugLevel::Debug, format_args!($($arg)*))
    };
}

macro_rules! pr_info {
    ($($arg:tt)*) => {
        $crate::diag::emit($crate::diag::DebugLevel::Info, format_args!($($arg)*))
    };
}

macro_rules! pr_wrn {
    ($($arg:tt)*) => {
        $crate::diag::emit($crate::diag::DebugLevel::Warning, format_args!($($arg)*))
    };
}

pub(crate) use pr_debug;
pub(crate) use pr_info;
pub(crate) use pr_wrn;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_level_is_emerg() {
        // Reset in case another test in this binary already bumped it.
        set_debug_level(DebugLevel::Emerg);
        assert_eq!(current_level(), DebugLevel::Emerg as i32);
    }

    #[test]
    fn ordering_matches_verbosity() {
        assert!(DebugLevel::Debug > DebugLevel::Info);
        assert!(DebugLevel::Info > DebugLevel::Warning);
        assert!(DebugLevel::Warning > DebugLevel::Verbose);
        assert!(DebugLevel::Verbose > DebugLevel::Emerg);
    }

    #[test]
    fn set_and_read_round_trips() {
        set_debug_level(DebugLevel::Debug);
        assert_eq!(current_level(), DebugLevel::Debug as i32);
        set_debug_level(DebugLevel::Emerg);
    }
}
