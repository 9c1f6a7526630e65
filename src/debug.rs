use crate::reconcile::MergeReport;
use crate::serialization::Snapshot;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);
static TRACE_MODE: AtomicBool = AtomicBool::new(false);

/// Initialize debug mode from environment variables
///
/// - `REPLICA_DEBUG=1` or `REPLICA_DEBUG_JSON=1`: log every snapshot as pretty JSON
/// - `REPLICA_TRACE=1`: log human-readable merge, codec and transport traces
///
/// Output goes through the `log` facade at debug level, so a logger must be
/// installed for anything to appear.
pub fn init_debug_mode() {
    let debug = env::var("REPLICA_DEBUG").is_ok() || env::var("REPLICA_DEBUG_JSON").is_ok();

    let trace = env::var("REPLICA_TRACE").is_ok();

    DEBUG_MODE.store(debug, Ordering::Relaxed);
    TRACE_MODE.store(trace, Ordering::Relaxed);

    if debug {
        log::info!("[REPLICA] Debug mode enabled - snapshots will be logged as JSON");
    }

    if trace {
        log::info!("[REPLICA] Trace mode enabled - human-readable operation logs");
    }
}

/// Check if debug mode is enabled
pub fn is_debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

/// Check if trace mode is enabled
pub fn is_trace_enabled() -> bool {
    TRACE_MODE.load(Ordering::Relaxed)
}

/// Log a snapshot in JSON format if debug mode is enabled
pub fn log_snapshot(direction: &str, snapshot: &Snapshot) {
    if !is_debug_enabled() {
        return;
    }

    match serde_json::to_string_pretty(snapshot) {
        Ok(json) => {
            log::debug!(
                "[REPLICA] {} {}:\n{}",
                direction,
                snapshot_summary(snapshot),
                json
            );
        }
        Err(e) => {
            log::debug!("[REPLICA] Failed to serialize snapshot to JSON: {}", e);
        }
    }
}

/// Trace the outcome of a merge in human-readable format if trace mode is enabled
pub fn trace_merge(report: &MergeReport) {
    if !is_trace_enabled() {
        return;
    }

    let mut lines = vec![format!(
        "[REPLICA] Merge of snapshot {} from entity {} as {:?}:",
        report.sequence, report.sender, report.role
    )];

    if !report.applied.is_empty() {
        lines.push(format!("  = {} applied", report.applied.len()));
    }
    if !report.ignored.is_empty() {
        lines.push(format!("  ~ {} ignored", report.ignored.len()));
    }
    if !report.repaired.is_empty() {
        lines.push(format!("  ! {} repaired after drift", report.repaired.len()));
    }
    for (key, error) in &report.rejected {
        lines.push(format!("  x {}: {}", key, error));
    }

    log::debug!("{}", lines.join("\n"));
}

/// Trace snapshot encoding with size and timing
pub fn trace_serialization(format: &str, size_bytes: usize, duration_micros: u128) {
    if !is_trace_enabled() {
        return;
    }

    log::debug!(
        "[REPLICA] Serialized {} using {} in {}µs",
        format_bytes(size_bytes),
        format,
        duration_micros
    );
}

/// Trace snapshot decoding with size and timing
pub fn trace_deserialization(format: &str, size_bytes: usize, duration_micros: u128) {
    if !is_trace_enabled() {
        return;
    }

    log::debug!(
        "[REPLICA] Deserialized {} using {} in {}µs",
        format_bytes(size_bytes),
        format,
        duration_micros
    );
}

/// Trace an outbound frame
pub fn trace_transport_send(bytes: usize, destination: &str) {
    if !is_trace_enabled() {
        return;
    }

    log::debug!("[REPLICA] → Sent {} to {}", format_bytes(bytes), destination);
}

/// Trace an inbound frame
pub fn trace_transport_receive(bytes: usize, source: &str) {
    if !is_trace_enabled() {
        return;
    }

    log::debug!("[REPLICA] ← Received {} from {}", format_bytes(bytes), source);
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

/// One-line summary of a snapshot for logs
pub fn snapshot_summary(snapshot: &Snapshot) -> String {
    format!(
        "Snapshot (sender: {}, seq: {}, fields: {}, changed: {})",
        snapshot.sender(),
        snapshot.sequence(),
        snapshot.field_count(),
        snapshot.change_set().len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FieldKey;
    use std::collections::HashMap;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 bytes");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_debug_mode_initialization() {
        // Should not crash without env vars
        init_debug_mode();
    }

    #[test]
    fn test_snapshot_summary() {
        let snapshot = Snapshot::from_parts(3, 12, HashMap::new(), vec![FieldKey::new(3, "score")]);
        assert_eq!(
            snapshot_summary(&snapshot),
            "Snapshot (sender: 3, seq: 12, fields: 0, changed: 1)"
        );
    }
}
