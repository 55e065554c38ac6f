//! Watchdog timer for detecting a stuck evaluation.
//!
//! Monitors how long a trampoline's `run()` call has been continuously
//! executing and triggers an alert when it exceeds a configured threshold.
//! Helps detect infinite loops and runaway computation without stopping
//! the process.
//!
//! ## Configuration (environment variables)
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RENC_WATCHDOG_SECS` | `0` (disabled) | Threshold in seconds for "stuck" |
//! | `RENC_WATCHDOG_INTERVAL` | `5` | Check frequency in seconds |
//! | `RENC_WATCHDOG_ACTION` | `warn` | Action: `warn` (dump diagnostics) or `exit` |
//!
//! ## Design
//!
//! The watchdog runs on a dedicated thread and periodically reads the
//! cross-thread registry in `renc_core::memory_stats`, which each
//! `Trampoline::run` call publishes a start timestamp into for the
//! duration of the call (spec §5: the core itself is single-threaded
//! cooperative, but distinct interpreter instances may live on separate
//! OS threads, each reachable from this one watchdog).

use crate::diagnostics::dump_diagnostics;
use renc_core::memory_stats::memory_registry;
use std::sync::Once;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

static WATCHDOG_INIT: Once = Once::new();
// Tracks which thread triggered the watchdog (0 = none yet).
static WATCHDOG_TRIGGERED_THREAD: AtomicU64 = AtomicU64::new(0);

/// Watchdog configuration.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub threshold_secs: u64,
    pub interval_secs: u64,
    pub action: WatchdogAction,
}

/// Action to take when the watchdog detects a stuck evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Log a warning and dump diagnostics (default).
    Warn,
    /// Dump diagnostics and exit the process.
    Exit,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            threshold_secs: 0, // Disabled by default.
            interval_secs: 5,
            action: WatchdogAction::Warn,
        }
    }
}

impl WatchdogConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let threshold_secs = std::env::var("RENC_WATCHDOG_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let interval_secs = std::env::var("RENC_WATCHDOG_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(5);

        let action = std::env::var("RENC_WATCHDOG_ACTION")
            .ok()
            .map(|s| match s.to_lowercase().as_str() {
                "exit" => WatchdogAction::Exit,
                _ => WatchdogAction::Warn,
            })
            .unwrap_or(WatchdogAction::Warn);

        Self {
            threshold_secs,
            interval_secs,
            action,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold_secs > 0
    }
}

/// Install the watchdog timer. Spawns a dedicated thread that periodically
/// checks for a stuck evaluation. Safe to call multiple times (idempotent
/// via `Once`). Only starts if `RENC_WATCHDOG_SECS` is a positive value.
pub fn install_watchdog() {
    WATCHDOG_INIT.call_once(|| {
        let config = WatchdogConfig::from_env();

        if !config.is_enabled() {
            return;
        }

        eprintln!(
            "[watchdog] Enabled: threshold={}s, interval={}s, action={:?}",
            config.threshold_secs, config.interval_secs, config.action
        );

        if let Err(e) = std::thread::Builder::new()
            .name("renc-watchdog".to_string())
            .spawn(move || watchdog_loop(config))
        {
            eprintln!("[watchdog] WARNING: failed to start watchdog thread: {}", e);
        }
    });
}

fn watchdog_loop(config: WatchdogConfig) {
    let interval = Duration::from_secs(config.interval_secs);

    loop {
        std::thread::sleep(interval);

        if let Some((thread_id, running_secs)) = check_for_stuck_evaluation(config.threshold_secs) {
            handle_stuck_evaluation(thread_id, running_secs, &config);
        }
    }
}

/// Scans the registry for any trampoline that has been running
/// continuously for longer than `threshold_secs`. Returns the
/// longest-running stuck thread, if any.
fn check_for_stuck_evaluation(threshold_secs: u64) -> Option<(u64, u64)> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();

    memory_registry()
        .stuck_threads(now, threshold_secs)
        .into_iter()
        .max_by_key(|&(_, secs)| secs)
}

fn handle_stuck_evaluation(thread_id: u64, running_secs: u64, config: &WatchdogConfig) {
    let prev_thread = WATCHDOG_TRIGGERED_THREAD.swap(thread_id, Ordering::Relaxed);
    let is_new_thread = prev_thread != thread_id;

    use std::io::Write;
    let mut stderr = std::io::stderr().lock();

    let _ = writeln!(stderr);
    let _ = writeln!(
        stderr,
        "WATCHDOG: thread {} evaluating for {}s (threshold: {}s)",
        thread_id, running_secs, config.threshold_secs
    );

    if prev_thread == 0 || is_new_thread {
        dump_diagnostics();
    }

    match config.action {
        WatchdogAction::Warn => {
            if prev_thread != 0 && !is_new_thread {
                let _ = writeln!(stderr, "    (still stuck, diagnostics suppressed)");
            }
        }
        WatchdogAction::Exit => {
            let _ = writeln!(stderr, "    Exiting due to RENC_WATCHDOG_ACTION=exit");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
pub fn reset_triggered() {
    WATCHDOG_TRIGGERED_THREAD.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn config_defaults() {
        let config = WatchdogConfig::default();
        assert_eq!(config.threshold_secs, 0);
        assert_eq!(config.interval_secs, 5);
        assert_eq!(config.action, WatchdogAction::Warn);
        assert!(!config.is_enabled());
    }

    #[test]
    fn config_enabled() {
        let config = WatchdogConfig {
            threshold_secs: 30,
            interval_secs: 10,
            action: WatchdogAction::Exit,
        };
        assert!(config.is_enabled());
    }

    #[test]
    fn check_with_no_stuck_evaluations() {
        let result = check_for_stuck_evaluation(u64::MAX);
        assert!(result.is_none());
    }

    unsafe fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) };
    }

    unsafe fn restore_env(key: &str, orig: Option<String>) {
        unsafe {
            match orig {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }

    #[test]
    fn from_env_all_values() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();

        let orig_secs = std::env::var("RENC_WATCHDOG_SECS").ok();
        let orig_interval = std::env::var("RENC_WATCHDOG_INTERVAL").ok();
        let orig_action = std::env::var("RENC_WATCHDOG_ACTION").ok();

        unsafe {
            set_env("RENC_WATCHDOG_SECS", "30");
            set_env("RENC_WATCHDOG_INTERVAL", "10");
            set_env("RENC_WATCHDOG_ACTION", "exit");
        }

        let config = WatchdogConfig::from_env();
        assert_eq!(config.threshold_secs, 30);
        assert_eq!(config.interval_secs, 10);
        assert_eq!(config.action, WatchdogAction::Exit);
        assert!(config.is_enabled());

        unsafe {
            restore_env("RENC_WATCHDOG_SECS", orig_secs);
            restore_env("RENC_WATCHDOG_INTERVAL", orig_interval);
            restore_env("RENC_WATCHDOG_ACTION", orig_action);
        }
    }

    #[test]
    fn from_env_invalid_values_fall_back_to_defaults() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();

        let orig_secs = std::env::var("RENC_WATCHDOG_SECS").ok();
        let orig_interval = std::env::var("RENC_WATCHDOG_INTERVAL").ok();

        unsafe {
            set_env("RENC_WATCHDOG_SECS", "not_a_number");
            set_env("RENC_WATCHDOG_INTERVAL", "0");
        }

        let config = WatchdogConfig::from_env();
        assert_eq!(config.threshold_secs, 0);
        assert_eq!(config.interval_secs, 5);

        unsafe {
            restore_env("RENC_WATCHDOG_SECS", orig_secs);
            restore_env("RENC_WATCHDOG_INTERVAL", orig_interval);
        }
    }

    #[test]
    fn from_env_unknown_action_defaults_to_warn() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();

        let orig = std::env::var("RENC_WATCHDOG_ACTION").ok();
        unsafe {
            set_env("RENC_WATCHDOG_ACTION", "unknown_action");
        }

        let config = WatchdogConfig::from_env();
        assert_eq!(config.action, WatchdogAction::Warn);

        unsafe {
            restore_env("RENC_WATCHDOG_ACTION", orig);
        }
    }
}
