// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.2
// Author: Lukas Bower
// Date Modified: 2027-08-28

//! Inbound edit pipeline: queue, application, diagnostics.

pub mod processor;
pub mod stats;

pub use processor::{EditPacketProcessor, QueuedPacket};
pub use stats::{EditSample, EditStats, EditStatsReport, SenderStats};
