//! Structured pipeline events, mirrored to `tracing` and kept in memory for callers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collect,
    Dedup,
    Expand,
    Detect,
    Fetch,
    Reconcile,
    Persist,
    Quality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Ok,
    Empty,
    Unhelpful,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticEvent {
    pub stage: Stage,
    pub strategy: Option<String>,
    pub identifier: String,
    pub outcome: EventOutcome,
    pub detail: Option<String>,
}

impl DiagnosticEvent {
    pub fn new(stage: Stage, identifier: impl Into<String>, outcome: EventOutcome) -> Self {
        Self {
            stage,
            strategy: None,
            identifier: identifier.into(),
            outcome,
            detail: None,
        }
    }

    pub fn strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Events kept in memory before the oldest are dropped.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 4096;

/// Shared event sink; cheap to clone into worker tasks. Holds at most
/// `capacity` events, evicting the oldest first.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    events: Arc<Mutex<VecDeque<DiagnosticEvent>>>,
    capacity: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_DIAGNOSTICS_CAPACITY)
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(256)))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, event: DiagnosticEvent) {
        let strategy = event.strategy.as_deref().unwrap_or("-");
        let detail = event.detail.as_deref().unwrap_or("");
        match event.outcome {
            EventOutcome::Failed => warn!(
                stage = ?event.stage,
                strategy,
                identifier = %event.identifier,
                outcome = ?event.outcome,
                detail,
                "pipeline event"
            ),
            EventOutcome::Unhelpful | EventOutcome::Skipped | EventOutcome::Empty => info!(
                stage = ?event.stage,
                strategy,
                identifier = %event.identifier,
                outcome = ?event.outcome,
                detail,
                "pipeline event"
            ),
            EventOutcome::Ok => debug!(
                stage = ?event.stage,
                strategy,
                identifier = %event.identifier,
                outcome = ?event.outcome,
                detail,
                "pipeline event"
            ),
        }

        if let Ok(mut events) = self.events.lock() {
            while events.len() >= self.capacity {
                events.pop_front();
            }
            events.push_back(event);
        }
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, stage: Stage, outcome: EventOutcome) -> usize {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.stage == stage && e.outcome == outcome)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drain events recorded so far, e.g. between scheduled runs.
    pub fn take(&self) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .map(|mut events| events.drain(..).collect())
            .unwrap_or_default()
    }
}
