use crate::protocol::{DebugUpdate, Op, UpdateOfShared, UpdateStats};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);
static TRACE_MODE: AtomicBool = AtomicBool::new(false);

/// Initialize debug mode from environment variables
///
/// - `TX2_SHARE_DEBUG=1`: log every flushed update as pretty JSON, both encodings
/// - `TX2_SHARE_TRACE=1`: log a one-line summary of every flush and serialization
pub fn init_debug_mode() {
    let debug = env::var("TX2_SHARE_DEBUG").is_ok();
    let trace = env::var("TX2_SHARE_TRACE").is_ok();

    DEBUG_MODE.store(debug, Ordering::Relaxed);
    TRACE_MODE.store(trace, Ordering::Relaxed);

    if debug {
        info!("debug mode enabled, flushed updates will be logged as JSON");
    }

    if trace {
        info!("trace mode enabled, flushes will be summarized");
    }
}

/// Switches both modes without touching the environment.
pub fn set_debug_mode(debug: bool, trace: bool) {
    DEBUG_MODE.store(debug, Ordering::Relaxed);
    TRACE_MODE.store(trace, Ordering::Relaxed);
}

pub fn is_debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

pub fn is_trace_enabled() -> bool {
    TRACE_MODE.load(Ordering::Relaxed)
}

/// Log both encodings of an update if debug mode is enabled
pub fn log_update(label: &str, compact: &UpdateOfShared, debug: &DebugUpdate) {
    if !is_debug_enabled() {
        return;
    }

    match (serde_json::to_string(compact), serde_json::to_string_pretty(debug)) {
        (Ok(compact), Ok(readable)) => {
            info!("{} update:\n{}\n{}", label, compact, readable);
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!("failed to serialize update to JSON: {}", e);
        }
    }
}

/// Trace a flush in human-readable format if trace mode is enabled
pub fn trace_flush(observer: u64, update: &UpdateOfShared) {
    if !is_trace_enabled() {
        return;
    }

    info!("observer {} flushed {}", observer, update_summary(update));
}

/// Trace a serialization operation
pub fn trace_serialization(format: &str, size_bytes: usize, duration_micros: u128) {
    if !is_trace_enabled() {
        return;
    }

    info!(
        "serialized {} using {} in {}µs",
        format_bytes(size_bytes),
        format,
        duration_micros
    );
}

/// Trace a deserialization operation
pub fn trace_deserialization(format: &str, size_bytes: usize, duration_micros: u128) {
    if !is_trace_enabled() {
        return;
    }

    info!(
        "deserialized {} using {} in {}µs",
        format_bytes(size_bytes),
        format,
        duration_micros
    );
}

/// Format bytes in human-readable format (KB, MB, etc.)
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// One-line description of an update, e.g. `+1 create, ~2 set (3 fields)`.
pub fn update_summary(update: &[Op]) -> String {
    let stats = UpdateStats::of(update);
    let mut parts = Vec::new();

    if stats.created > 0 {
        parts.push(format!("+{} create", stats.created));
    }
    if stats.destroyed > 0 {
        parts.push(format!("-{} destroy", stats.destroyed));
    }
    if stats.instances_set > 0 {
        parts.push(format!("~{} set ({} fields)", stats.instances_set, stats.fields_set));
    }
    if stats.calls > 0 {
        parts.push(format!("{} call", stats.calls));
    }

    if parts.is_empty() {
        "empty update".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CallOp, CreateEntry, SetEntry, WireValue};

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 bytes");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_update_summary() {
        assert_eq!(update_summary(&[]), "empty update");

        let update = vec![
            Op::Create(vec![CreateEntry(3, 1000, vec![WireValue::Null])]),
            Op::Set(vec![
                SetEntry(1000, vec![(0, WireValue::Number(1.0))]),
                SetEntry(1001, vec![(0, WireValue::Null), (1, WireValue::Null)]),
            ]),
            Op::Call(CallOp { target: 4, this_arg: None, args: vec![] }),
        ];
        assert_eq!(update_summary(&update), "+1 create, ~2 set (3 fields), 1 call");
    }

    #[test]
    fn test_logging_with_modes_on() {
        set_debug_mode(true, true);
        let update = vec![Op::Destroy(vec![1000])];
        log_update("Test", &update, &DebugUpdate::default());
        trace_flush(1, &update);
        trace_serialization("json", 12, 3);
        set_debug_mode(false, false);
        assert!(!is_debug_enabled());
    }

    #[test]
    fn test_debug_mode_initialization() {
        // Should not crash without env vars
        init_debug_mode();
    }
}
