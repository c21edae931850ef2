//! Structured run events
//!
//! The engine reports what happens through an injected [`Observer`] instead of
//! a process-wide logger. [`TracingObserver`] turns the events into `tracing`
//! records; [`RecordingObserver`] keeps them in memory.

use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

/// What a single attempt produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success { records: usize },
    /// Transient failure; another attempt follows after the delay
    Retrying { status: Option<u16>, error: String },
    /// Transient failure with no attempts left
    Exhausted { status: Option<u16>, error: String },
    Fatal { status: Option<u16>, error: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptEvent {
    pub page: u64,
    /// 0-based attempt index within the page
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    /// Backoff slept before the next attempt, when one follows
    pub delay: Option<Duration>,
}

/// Final disposition of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageResolution {
    Ingested { records: usize, bytes: u64 },
    Failed { reason: String },
    ShapeRejected { reason: String },
    Fatal { reason: String },
}

/// How the run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    Completed { detail: String },
    Aborted { detail: String },
}

impl std::fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalReason::Completed { detail } => write!(f, "completed: {}", detail),
            TerminalReason::Aborted { detail } => write!(f, "aborted: {}", detail),
        }
    }
}

pub trait Observer: Send + Sync {
    fn page_attempt(&self, event: &AttemptEvent);
    fn page_resolved(&self, page: u64, resolution: &PageResolution);
    fn run_terminal(&self, reason: &TerminalReason);
}

/// Emits every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn page_attempt(&self, event: &AttemptEvent) {
        let delay_ms = event.delay.map(|d| d.as_millis() as u64);
        match &event.outcome {
            AttemptOutcome::Success { records } => info!(
                page = event.page,
                attempt = event.attempt,
                records,
                "page fetched"
            ),
            AttemptOutcome::Retrying { status, error } => warn!(
                page = event.page,
                attempt = event.attempt,
                status = ?status,
                delay_ms = ?delay_ms,
                %error,
                "transient failure, retrying"
            ),
            AttemptOutcome::Exhausted { status, error } => error!(
                page = event.page,
                attempt = event.attempt,
                status = ?status,
                %error,
                "retries exhausted"
            ),
            AttemptOutcome::Fatal { status, error } => error!(
                page = event.page,
                attempt = event.attempt,
                status = ?status,
                %error,
                "fatal failure"
            ),
            AttemptOutcome::Cancelled => {
                warn!(page = event.page, attempt = event.attempt, "attempt cancelled")
            },
        }
    }

    fn page_resolved(&self, page: u64, resolution: &PageResolution) {
        match resolution {
            PageResolution::Ingested { records, bytes } => {
                info!(page, records, bytes, "page ingested")
            },
            PageResolution::Failed { reason } => warn!(page, %reason, "page failed, continuing"),
            PageResolution::ShapeRejected { reason } => {
                warn!(page, %reason, "page rejected by sink, continuing")
            },
            PageResolution::Fatal { reason } => error!(page, %reason, "page failed fatally"),
        }
    }

    fn run_terminal(&self, reason: &TerminalReason) {
        match reason {
            TerminalReason::Completed { detail } => info!(%detail, "run completed"),
            TerminalReason::Aborted { detail } => error!(%detail, "run aborted"),
        }
    }
}

/// An event captured by [`RecordingObserver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    Attempt(AttemptEvent),
    Resolved(u64, PageResolution),
    Terminal(TerminalReason),
}

/// Keeps every event in memory, in arrival order
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn attempts(&self) -> Vec<AttemptEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ObservedEvent::Attempt(attempt) => Some(attempt),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ObservedEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Observer for RecordingObserver {
    fn page_attempt(&self, event: &AttemptEvent) {
        self.push(ObservedEvent::Attempt(event.clone()));
    }

    fn page_resolved(&self, page: u64, resolution: &PageResolution) {
        self.push(ObservedEvent::Resolved(page, resolution.clone()));
    }

    fn run_terminal(&self, reason: &TerminalReason) {
        self.push(ObservedEvent::Terminal(reason.clone()));
    }
}
