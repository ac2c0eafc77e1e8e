// CLASSIFICATION: COMMUNITY
// Filename: util.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-08-27

//! Small shared helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch, the timestamp unit embedded in
/// edit packets for transit-time measurement.
pub fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
