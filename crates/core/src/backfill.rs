//! Target-ratio backfill calculator.
//!
//! Orders may be configured to receive a share of aged backlog leads.
//! The calculator answers one question per delivered unit: if one more
//! unit is delivered now, would the backlog share still sit below the
//! target? A positive answer means the next unit should be drawn from the
//! backlog pool.

/// `ceil(target_pct * (delivered + 1)) - backlog_delivered`, or 0 for a
/// non-positive target. Positive means the next unit should be backlog.
pub fn backlog_needed(target_pct: f64, delivered: u32, backlog_delivered: u32) -> i64 {
    if target_pct <= 0.0 {
        return 0;
    }
    let expected = (target_pct * f64::from(delivered + 1)).ceil() as i64;
    expected - i64::from(backlog_delivered)
}

/// Convenience form of the same decision.
pub fn next_unit_is_backlog(target_pct: f64, delivered: u32, backlog_delivered: u32) -> bool {
    backlog_needed(target_pct, delivered, backlog_delivered) > 0
}
