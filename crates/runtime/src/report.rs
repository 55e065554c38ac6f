//! At-exit report for an embedding host, controlled by the `RENC_REPORT`
//! env var:
//! - Unset -> no report, zero cost
//! - `1` -> human-readable to stderr
//! - `json` -> JSON to stderr
//! - `json:/path` -> JSON to file
//!
//! ## Feature flag
//!
//! This module requires the `diagnostics` feature (enabled by default).

#![cfg(feature = "diagnostics")]

use renc_core::memory_stats::memory_registry;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Marks the start of the timed interval for the wall-clock figure in the
/// report. Call once, early in the host's startup; a no-op after the
/// first call.
pub fn mark_start() {
    let _ = START_TIME.set(Instant::now());
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDestination {
    Stderr,
    File(String),
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub format: ReportFormat,
    pub destination: ReportDestination,
}

impl ReportConfig {
    /// Parse from the `RENC_REPORT` environment variable.
    pub fn from_env() -> Option<Self> {
        let val = std::env::var("RENC_REPORT").ok()?;
        if val.is_empty() {
            return None;
        }

        match val.as_str() {
            "0" => None,
            "1" => Some(ReportConfig {
                format: ReportFormat::Human,
                destination: ReportDestination::Stderr,
            }),
            "json" => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::Stderr,
            }),
            s if s.starts_with("json:") => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::File(s[5..].to_string()),
            }),
            _ => {
                eprintln!("Warning: RENC_REPORT='{}' not recognized, ignoring", val);
                None
            }
        }
    }
}

static REPORT_CONFIG: OnceLock<Option<ReportConfig>> = OnceLock::new();

fn get_report_config() -> &'static Option<ReportConfig> {
    REPORT_CONFIG.get_or_init(ReportConfig::from_env)
}

/// Collected metrics for the report.
#[derive(Debug)]
pub struct ReportData {
    pub wall_clock_ms: u64,
    pub total_ticks: u64,
    pub peak_levels: u64,
    pub active_instances: usize,
    pub total_arena_bytes: u64,
    pub total_peak_arena_bytes: u64,
    pub total_stub_allocations: u64,
}

fn collect_report_data() -> ReportData {
    let wall_clock_ms = START_TIME
        .get()
        .map(|t| t.elapsed().as_millis() as u64)
        .unwrap_or(0);

    let agg = memory_registry().aggregate_stats();

    ReportData {
        wall_clock_ms,
        total_ticks: agg.total_ticks,
        peak_levels: agg.peak_levels,
        active_instances: agg.active_threads,
        total_arena_bytes: agg.total_arena_bytes,
        total_peak_arena_bytes: agg.total_arena_bytes, // registry only tracks current, not historical peak
        total_stub_allocations: agg.total_stub_allocations,
    }
}

fn format_human(data: &ReportData) -> String {
    let mut out = String::new();
    out.push_str("=== RUNTIME REPORT ===\n");
    out.push_str(&format!("Wall clock:       {} ms\n", data.wall_clock_ms));
    out.push_str(&format!("Trampoline ticks: {}\n", data.total_ticks));
    out.push_str(&format!("Peak levels:      {}\n", data.peak_levels));
    out.push_str(&format!("Instances:        {}\n", data.active_instances));
    out.push_str(&format!(
        "Arena bytes:      {}\n",
        data.total_arena_bytes
    ));
    out.push_str(&format!(
        "Stub allocations: {}\n",
        data.total_stub_allocations
    ));
    out.push_str("==================\n");
    out
}

#[cfg(feature = "report-json")]
fn format_json(data: &ReportData) -> String {
    let mut map = serde_json::Map::new();
    map.insert(
        "wall_clock_ms".into(),
        serde_json::Value::Number(data.wall_clock_ms.into()),
    );
    map.insert(
        "total_ticks".into(),
        serde_json::Value::Number(data.total_ticks.into()),
    );
    map.insert(
        "peak_levels".into(),
        serde_json::Value::Number(data.peak_levels.into()),
    );
    map.insert(
        "active_instances".into(),
        serde_json::Value::Number((data.active_instances as u64).into()),
    );
    map.insert(
        "arena_bytes".into(),
        serde_json::Value::Number(data.total_arena_bytes.into()),
    );
    map.insert(
        "stub_allocations".into(),
        serde_json::Value::Number(data.total_stub_allocations.into()),
    );

    serde_json::to_string(&serde_json::Value::Object(map)).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(not(feature = "report-json"))]
fn format_json(data: &ReportData) -> String {
    eprintln!(
        "Warning: RENC_REPORT=json requires the 'report-json' feature. Falling back to human format."
    );
    format_human(data)
}

/// Emit the at-exit report if `RENC_REPORT` requests one. A host calls
/// this once, typically just before its `main` returns.
pub fn emit_report() {
    let config = match get_report_config() {
        Some(c) => c,
        None => return,
    };

    let data = collect_report_data();

    let output = match config.format {
        ReportFormat::Human => format_human(&data),
        ReportFormat::Json => format_json(&data),
    };

    match &config.destination {
        ReportDestination::Stderr => {
            let _ = std::io::stderr().write_all(output.as_bytes());
        }
        ReportDestination::File(path) => {
            if let Ok(mut f) = std::fs::File::create(path) {
                let _ = f.write_all(output.as_bytes());
            } else {
                eprintln!("Warning: could not write report to {}", path);
                let _ = std::io::stderr().write_all(output.as_bytes());
            }
        }
    }
}
