//! Error taxonomy for remote operations.
//!
//! Every failure observed by the engine is sorted into one [`FailureClass`]:
//!
//! - `Retryable`: transport faults, timeouts, throttling and transient
//!   server unavailability. Retried under the governing policy.
//! - `Terminal`: construction errors, validation failures and definitive
//!   rejections (permission denied, malformed payload). Never retried.
//! - `NotFound`: the key did not resolve. Terminal for a single lookup step,
//!   which is what triggers the name fallback in [`crate::resolver`].
//!
//! The fourth outcome, running out of time while failures were still
//! retryable, is not a classification of any single error. The retry executor
//! synthesises it as [`RetryError::TimeoutExhausted`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// How the engine should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Transient; the same request may succeed later.
    Retryable,
    /// Definitive; repeating the request will not change the answer.
    Terminal,
    /// The addressed object does not exist under the key that was used.
    NotFound,
}

/// Implemented by every error type that participates in retry decisions.
pub trait Classify {
    fn classify(&self) -> FailureClass;
}

/// Maps an HTTP-like status code onto a [`FailureClass`].
///
/// Statuses that are not explicitly recognised as definitive are treated as
/// retryable, so an unfamiliar fault never ends an operation early.
pub fn classify_status(status: u16) -> FailureClass {
    match status {
        404 | 410 => FailureClass::NotFound,
        408 | 409 | 423 | 425 | 429 => FailureClass::Retryable,
        400..=499 => FailureClass::Terminal,
        _ => FailureClass::Retryable,
    }
}

// ---------------------------------------------------------------------------
// Remote API errors
// ---------------------------------------------------------------------------

/// Error returned by the remote management API client.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ApiError {
    /// The remote API answered with a non-success status.
    #[error("remote API returned status {status}: {message}")]
    Status {
        /// HTTP-like status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The request never produced a response (connection reset, DNS failure,
    /// client-side timeout).
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// The request could not be built from the desired configuration.
    #[error("request could not be constructed: {message}")]
    Construction { message: String },
}

impl ApiError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn construction(message: impl Into<String>) -> Self {
        Self::Construction {
            message: message.into(),
        }
    }

    /// Returns the status code, if the remote API produced one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Classify for ApiError {
    fn classify(&self) -> FailureClass {
        match self {
            ApiError::Status { status, .. } => classify_status(*status),
            ApiError::Transport { .. } => FailureClass::Retryable,
            ApiError::Construction { .. } => FailureClass::Terminal,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-attempt outcome
// ---------------------------------------------------------------------------

/// Result of a single attempt at a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome<T, E> {
    Success(T),
    RetryableFailure(E),
    TerminalFailure(E),
}

impl<T, E: Classify> OperationOutcome<T, E> {
    /// Converts a classified `Result` into an outcome.
    ///
    /// `NotFound` becomes terminal: a missing object does not appear by asking
    /// again with the same key. Callers that expect read lag (see
    /// [`crate::reconcile`]) override this mapping.
    pub fn from_result(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => OperationOutcome::Success(value),
            Err(err) => match err.classify() {
                FailureClass::Retryable => OperationOutcome::RetryableFailure(err),
                FailureClass::Terminal | FailureClass::NotFound => {
                    OperationOutcome::TerminalFailure(err)
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Retry loop exit errors
// ---------------------------------------------------------------------------

/// Why a retry loop ended without a success value.
///
/// `Terminal` means the operation genuinely failed. `TimeoutExhausted` means
/// it was still failing transiently when the deadline passed, and
/// `AttemptsExhausted` that it was still failing when the policy's attempt
/// cap was reached; callers report these differently.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// A non-retryable failure ended the loop.
    #[error("{error}")]
    Terminal {
        /// Attempts made, including the failing one.
        attempts: u32,
        error: E,
    },

    /// The bounding context expired while failures were still retryable.
    #[error("gave up after {attempts} attempt(s) in {elapsed:?}; last error: {last}")]
    TimeoutExhausted {
        attempts: u32,
        elapsed: Duration,
        /// The most recent retryable failure.
        last: E,
    },

    /// The policy's attempt cap was reached while failures were still
    /// retryable.
    #[error("still failing after {attempts} attempt(s); last error: {last}")]
    AttemptsExhausted { attempts: u32, last: E },

    /// The bounding context expired while the first attempt was still in
    /// flight, so no failure was ever observed.
    #[error("operation interrupted after {elapsed:?} before any attempt completed")]
    Interrupted { elapsed: Duration },
}

impl<E> RetryError<E> {
    /// Returns `true` if the loop ran out of time rather than failing outright.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RetryError::TimeoutExhausted { .. } | RetryError::Interrupted { .. }
        )
    }

    /// Number of attempts that completed.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Terminal { attempts, .. }
            | RetryError::TimeoutExhausted { attempts, .. }
            | RetryError::AttemptsExhausted { attempts, .. } => *attempts,
            RetryError::Interrupted { .. } => 0,
        }
    }

    /// The last observed failure, if any.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Terminal { error, .. } => Some(error),
            RetryError::TimeoutExhausted { last, .. } | RetryError::AttemptsExhausted { last, .. } => {
                Some(last)
            }
            RetryError::Interrupted { .. } => None,
        }
    }

    /// Consumes the error, returning the last observed failure, if any.
    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::Terminal { error, .. } => Some(error),
            RetryError::TimeoutExhausted { last, .. } | RetryError::AttemptsExhausted { last, .. } => {
                Some(last)
            }
            RetryError::Interrupted { .. } => None,
        }
    }

    /// Applies `f` to the carried failure, keeping the exit reason.
    pub fn map<F, G>(self, f: G) -> RetryError<F>
    where
        G: FnOnce(E) -> F,
    {
        match self {
            RetryError::Terminal { attempts, error } => RetryError::Terminal {
                attempts,
                error: f(error),
            },
            RetryError::TimeoutExhausted {
                attempts,
                elapsed,
                last,
            } => RetryError::TimeoutExhausted {
                attempts,
                elapsed,
                last: f(last),
            },
            RetryError::AttemptsExhausted { attempts, last } => RetryError::AttemptsExhausted {
                attempts,
                last: f(last),
            },
            RetryError::Interrupted { elapsed } => RetryError::Interrupted { elapsed },
        }
    }
}

impl<E: Classify> RetryError<E> {
    /// Returns `true` if the loop ended on a terminal `NotFound` failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RetryError::Terminal { error, .. } if error.classify() == FailureClass::NotFound)
    }
}
