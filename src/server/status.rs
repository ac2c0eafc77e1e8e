// CLASSIFICATION: COMMUNITY
// Filename: status.rs v0.3
// Author: Lukas Bower
// Date Modified: 2027-08-29

//! Read-only status snapshot for external presentation layers.
//!
//! The core only assembles data here; rendering (HTML, text, JSON) is
//! the presentation layer's business.

use std::sync::PoisonError;

use serde::Serialize;

use crate::client::SessionSummary;
use crate::edit::EditStatsReport;
use crate::octree::{MemoryUsage, NodeCounts};
use crate::server::ServerContext;

/// Persistence bookkeeping as shown on the status page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PersistReport {
    pub enabled: bool,
    pub loaded_at: Option<String>,
    pub load_millis: Option<u64>,
    pub last_save_at: Option<String>,
    pub save_failures: u64,
}

/// One coherent snapshot of everything worth reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub started_at: String,
    pub uptime_secs: u64,
    pub nodes: NodeCounts,
    pub memory: MemoryUsage,
    pub total_memory_bytes: u64,
    pub edit_stats: EditStatsReport,
    pub sessions: Vec<SessionSummary>,
    pub persist: PersistReport,
}

/// Assemble a snapshot from the live server context.
pub fn gather(ctx: &ServerContext) -> StatusReport {
    let (nodes, memory) = {
        let store = ctx.store.read().unwrap_or_else(PoisonError::into_inner);
        (store.counts(), store.memory_usage())
    };
    let persist = {
        let status = ctx
            .persist_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        PersistReport {
            enabled: ctx.config.persist.is_some(),
            loaded_at: status.loaded_at.map(|t| t.to_rfc3339()),
            load_millis: status.load_duration.map(|d| d.as_millis() as u64),
            last_save_at: status.last_save_at.map(|t| t.to_rfc3339()),
            save_failures: status.save_failures,
        }
    };
    StatusReport {
        started_at: ctx.started_at.to_rfc3339(),
        uptime_secs: ctx.started.elapsed().as_secs(),
        nodes,
        memory,
        total_memory_bytes: memory.total_bytes(),
        edit_stats: ctx.edit_stats.report(),
        sessions: ctx.sessions.summaries(),
        persist,
    }
}
