//! Single-page resolution with bounded retries
//!
//! [`PageFetcher::fetch`] drives one page to a [`PageResult`]: it asks the
//! authenticator for a fresh header, sends the request, classifies any
//! failure through [`BackoffPolicy`] and sleeps between attempts. The sleep
//! races the cancellation token, so a cancelled run never waits out a
//! backoff. Nothing here logs; every attempt is handed to the [`Observer`].

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthError, Authenticator};
use crate::backoff::{BackoffPolicy, Classification};
use crate::cursor::PageRequest;
use crate::observer::{AttemptEvent, AttemptOutcome, Observer};
use crate::page::{FailureKind, PageData, PageFailure, PageResult};
use crate::stats::RunStats;
use crate::transport::{Transport, TransportError};

/// Why one attempt failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("HTTP {status}")]
    Status { status: u16 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("HTTP {status} with undecodable body: {message}")]
    Decode { status: u16, message: String },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status } | FetchError::Decode { status, .. } => Some(*status),
            FetchError::Transport(_) | FetchError::Auth(_) => None,
        }
    }
}

/// Retry bookkeeping for the page currently being resolved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptState {
    /// Failed tries so far
    pub attempt: u32,
    pub last_classification: Option<Classification>,
    pub next_delay: Option<Duration>,
}

impl AttemptState {
    fn record_failure(&mut self, classification: Classification) {
        self.attempt += 1;
        self.last_classification = Some(classification);
        self.next_delay = None;
    }
}

pub struct PageFetcher {
    transport: Arc<dyn Transport>,
    auth: Arc<dyn Authenticator>,
    policy: BackoffPolicy,
    observer: Arc<dyn Observer>,
}

impl PageFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        auth: Arc<dyn Authenticator>,
        policy: BackoffPolicy,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            transport,
            auth,
            policy,
            observer,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Resolve `request`, retrying transient failures.
    ///
    /// `stats.retry_count` grows by one for every backoff that completes.
    pub async fn fetch(
        &self,
        request: &PageRequest,
        stats: &mut RunStats,
        cancel: &CancellationToken,
    ) -> PageResult {
        let mut state = AttemptState::default();

        loop {
            let index = state.attempt;
            if cancel.is_cancelled() {
                return self.cancelled(request, &state);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = self.attempt(request) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                return self.cancelled(request, &state);
            };

            let (error, classification) = match outcome {
                Ok(page) => {
                    self.emit(
                        request,
                        index,
                        AttemptOutcome::Success {
                            records: page.len(),
                        },
                        None,
                    );
                    return PageResult::Success(page);
                },
                Err(failure) => failure,
            };

            state.record_failure(classification);
            let status = error.status();

            if !classification.is_retryable() {
                self.emit(
                    request,
                    index,
                    AttemptOutcome::Fatal {
                        status,
                        error: error.to_string(),
                    },
                    None,
                );
                return page_failure(FailureKind::Fatal, status, &error, &state);
            }

            if self.policy.exhausted(state.attempt) {
                self.emit(
                    request,
                    index,
                    AttemptOutcome::Exhausted {
                        status,
                        error: error.to_string(),
                    },
                    None,
                );
                return page_failure(FailureKind::Exhausted, status, &error, &state);
            }

            let delay = self.policy.next_delay(state.attempt - 1, classification);
            state.next_delay = Some(delay);
            self.emit(
                request,
                index,
                AttemptOutcome::Retrying {
                    status,
                    error: error.to_string(),
                },
                Some(delay),
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(request, &state),
                _ = tokio::time::sleep(delay) => stats.record_retry(),
            }
        }
    }

    /// One send. Errors carry their classification.
    async fn attempt(&self, request: &PageRequest) -> Result<PageData, (FetchError, Classification)> {
        let header = self
            .auth
            .auth_header()
            .await
            .map_err(|e| (FetchError::from(e), Classification::Fatal))?;

        let response = match self.transport.send(request, &header).await {
            Ok(response) => response,
            Err(e) => {
                let classification = BackoffPolicy::classify_transport(&e);
                return Err((e.into(), classification));
            },
        };

        if !response.is_success() {
            let classification = BackoffPolicy::classify(response.status, &response.headers);
            return Err((
                FetchError::Status {
                    status: response.status,
                },
                classification,
            ));
        }

        // A 2xx the API could not finish writing is as transient as a 503
        PageData::from_slice(&response.body).map_err(|message| {
            (
                FetchError::Decode {
                    status: response.status,
                    message,
                },
                Classification::Retryable { hint: None },
            )
        })
    }

    fn cancelled(&self, request: &PageRequest, state: &AttemptState) -> PageResult {
        self.emit(request, state.attempt, AttemptOutcome::Cancelled, None);
        PageResult::Failure(PageFailure {
            kind: FailureKind::Cancelled,
            status: None,
            message: "cancelled".to_string(),
            attempts: state.attempt,
        })
    }

    fn emit(
        &self,
        request: &PageRequest,
        attempt: u32,
        outcome: AttemptOutcome,
        delay: Option<Duration>,
    ) {
        self.observer.page_attempt(&AttemptEvent {
            page: request.sequence,
            attempt,
            outcome,
            delay,
        });
    }
}

fn page_failure(
    kind: FailureKind,
    status: Option<u16>,
    error: &FetchError,
    state: &AttemptState,
) -> PageResult {
    PageResult::Failure(PageFailure {
        kind,
        status,
        message: error.to_string(),
        attempts: state.attempt,
    })
}
