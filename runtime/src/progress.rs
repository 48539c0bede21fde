// Copyright 2026 Landcomp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Progress event types and broadcast channel for acquisition runs.
//!
//! The pipeline emits `PipelineEvent`s through a `tokio::sync::broadcast`
//! channel to all subscribers (the CLI progress bar, tests). When no
//! subscriber exists, events are silently dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use landcomp::{CaptureMethod, LedgerStatus};
use serde::{Deserialize, Serialize};

use crate::pipeline::RunSummary;

/// A progress event emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// The run this event belongs to.
    pub run_id: String,
    /// Monotonically increasing sequence number.
    pub seq: u64,
    /// The kind of progress event.
    pub event: PipelineEventKind,
}

/// The specific kind of progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEventKind {
    /// The batch is about to start.
    RunStarted { total: usize, pending: usize },
    /// A query was already complete in the ledger.
    QuerySkipped { key: String },
    /// A query is being attempted.
    QueryStarted {
        index: usize,
        total: usize,
        key: String,
        url: String,
    },
    /// The Session Manager ran, either before capture or mid-capture.
    LoginAttempted {
        success: bool,
        stage: Option<String>,
    },
    /// A query's outcome was written to the ledger.
    QueryFinished {
        key: String,
        status: LedgerStatus,
        method: Option<CaptureMethod>,
        bytes: Option<u64>,
        error: Option<String>,
    },
    /// The batch finished.
    RunComplete { summary: RunSummary },
}

/// Sender handle for emitting pipeline events.
pub type EventSender = tokio::sync::broadcast::Sender<PipelineEvent>;

/// Receiver handle for consuming pipeline events.
pub type EventReceiver = tokio::sync::broadcast::Receiver<PipelineEvent>;

/// Create a new event broadcast channel with a bounded buffer.
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(256)
}

/// Stamps events with the run id and sequence number before sending.
#[derive(Debug)]
pub struct Emitter {
    tx: Option<EventSender>,
    run_id: String,
    seq: AtomicU64,
}

impl Emitter {
    pub fn new(tx: Option<EventSender>, run_id: impl Into<String>) -> Self {
        Self {
            tx,
            run_id: run_id.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// An emitter with no channel; every event is dropped.
    pub fn silent() -> Self {
        Self::new(None, "")
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Emit an event, ignoring send errors (no receivers listening).
    pub fn emit(&self, event: PipelineEventKind) {
        if let Some(ref sender) = self.tx {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
            let _ = sender.send(PipelineEvent {
                run_id: self.run_id.clone(),
                seq,
                event,
            });
        }
    }
}
