//! Runtime diagnostics for production debugging.
//!
//! Provides a SIGQUIT (kill -3) handler that dumps interpreter statistics
//! to stderr, similar to a JVM thread dump. Useful for inspecting a stuck
//! or runaway evaluation without stopping the process.
//!
//! ## Usage
//!
//! Send SIGQUIT to a running process embedding this runtime:
//! ```bash
//! kill -3 <pid>
//! ```
//!
//! The process dumps diagnostics to stderr and continues running.
//!
//! Reads are cross-thread (spec §5: multiple interpreter instances may run
//! on separate OS threads, each with its own pools/trampoline), via the
//! registry in `renc_core::memory_stats` -- the same registry `pool.rs`
//! and `trampoline.rs` already publish into on their hot paths.

use renc_core::memory_stats::memory_registry;
use std::sync::Once;

static SIGNAL_HANDLER_INIT: Once = Once::new();

/// Install the SIGQUIT signal handler for diagnostics.
///
/// Safe to call multiple times (idempotent).
pub fn install_signal_handler() {
    SIGNAL_HANDLER_INIT.call_once(|| {
        #[cfg(unix)]
        {
            unsafe {
                let _ = signal_hook::low_level::register(signal_hook::consts::SIGQUIT, || {
                    dump_diagnostics();
                });
            }
        }

        #[cfg(not(unix))]
        {
            // Signal handling not supported on non-Unix platforms; callers
            // can still invoke dump_diagnostics() directly.
        }
    });
}

/// Dump runtime diagnostics to stderr.
///
/// Can be called directly or triggered via SIGQUIT. Output goes to stderr
/// to avoid mixing with any program output on stdout.
pub fn dump_diagnostics() {
    use std::io::Write;

    let mut out = std::io::stderr().lock();
    let registry = memory_registry();
    let agg = registry.aggregate_stats();

    let _ = writeln!(out, "\n=== Runtime Diagnostics ===");
    let _ = writeln!(out, "Timestamp: {:?}", std::time::SystemTime::now());

    let _ = writeln!(out, "\n[Interpreter instances]");
    let _ = writeln!(out, "  Active: {}", agg.active_threads);
    if agg.overflow_count > 0 {
        let _ = writeln!(
            out,
            "  WARNING: {} instance(s) could not claim a registry slot",
            agg.overflow_count
        );
    }

    let _ = writeln!(out, "\n[Trampoline]");
    let _ = writeln!(out, "  Total ticks:   {}", agg.total_ticks);
    let _ = writeln!(out, "  Active levels: {}", agg.total_active_levels);
    let _ = writeln!(out, "  Peak levels:   {}", agg.peak_levels);

    let _ = writeln!(out, "\n[Memory]");
    let _ = writeln!(out, "  Arena bytes:     {}", agg.total_arena_bytes);
    let _ = writeln!(out, "  Stub capacity:   {}", agg.total_stub_capacity);
    let _ = writeln!(out, "  Stub free:       {}", agg.total_stub_free);
    let _ = writeln!(out, "  Stub allocs:     {}", agg.total_stub_allocations);

    let _ = writeln!(out, "\n[Per-instance]");
    for t in registry.per_thread_stats() {
        let _ = writeln!(
            out,
            "  thread {:>6}: tick={:<8} levels={:<4} (peak {:<4}) stub_cap={:<6} stub_free={:<6}",
            t.thread_id, t.tick, t.active_levels, t.peak_levels, t.stub_capacity, t.stub_free_count
        );
    }

    let _ = writeln!(out, "\n=== End Diagnostics ===\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_diagnostics_runs() {
        dump_diagnostics();
    }

    #[test]
    fn install_signal_handler_idempotent() {
        install_signal_handler();
        install_signal_handler();
    }
}
