//! Session status registry
//!
//! The dbserver tracks each experiment/analysis with one of a fixed set of
//! status literals. Each literal carries an ordinal; ordinals are monotonic
//! within a phase group:
//!
//! ```text
//! pre-run   INITIALIZING=0  AWAITING_CHECK=1  WAITING_TO_RUN=2  HOLD=3
//! running   STARTING=10     RUNNING=11        CANCELLING=12     FINISHING=13
//! terminal  FINISHED=100    ABORTED=101
//! failure   FAILED=1000     CANCELLED=1001    FAULTY=1002
//! ```
//!
//! A status is *stop-worthy* when the driver must not continue its run:
//! ordinal >= 100, or `CANCELLING`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lifecycle status of a remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Row created, not yet checked.
    Initializing,
    /// Waiting for an operator check.
    AwaitingCheck,
    /// Scheduled, waiting for its start condition.
    WaitingToRun,
    /// Held back by an operator.
    Hold,
    /// Driver is starting up.
    Starting,
    /// Driver is running.
    Running,
    /// Cancel requested; driver must stop.
    Cancelling,
    /// Driver is wrapping up after its time budget.
    Finishing,
    /// Completed normally.
    Finished,
    /// Stopped early without error.
    Aborted,
    /// Failed with an unrecoverable error.
    Failed,
    /// Cancel completed.
    Cancelled,
    /// Session data is inconsistent.
    Faulty,
}

/// Phase group of a [`Status`], derived from its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Ordinal below 10.
    PreRun,
    /// Ordinal 10..100.
    Running,
    /// Ordinal 100..1000.
    Terminal,
    /// Ordinal 1000 and above.
    Failure,
}

impl Status {
    /// Every status, ordered by ordinal.
    pub const ALL: [Self; 13] = [
        Self::Initializing,
        Self::AwaitingCheck,
        Self::WaitingToRun,
        Self::Hold,
        Self::Starting,
        Self::Running,
        Self::Cancelling,
        Self::Finishing,
        Self::Finished,
        Self::Aborted,
        Self::Failed,
        Self::Cancelled,
        Self::Faulty,
    ];

    /// Integer code used for range classification.
    #[must_use]
    pub const fn ordinal(self) -> u16 {
        match self {
            Self::Initializing => 0,
            Self::AwaitingCheck => 1,
            Self::WaitingToRun => 2,
            Self::Hold => 3,
            Self::Starting => 10,
            Self::Running => 11,
            Self::Cancelling => 12,
            Self::Finishing => 13,
            Self::Finished => 100,
            Self::Aborted => 101,
            Self::Failed => 1000,
            Self::Cancelled => 1001,
            Self::Faulty => 1002,
        }
    }

    /// Wire literal, e.g. `"RUNNING"`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::AwaitingCheck => "AWAITING_CHECK",
            Self::WaitingToRun => "WAITING_TO_RUN",
            Self::Hold => "HOLD",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Cancelling => "CANCELLING",
            Self::Finishing => "FINISHING",
            Self::Finished => "FINISHED",
            Self::Aborted => "ABORTED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Faulty => "FAULTY",
        }
    }

    /// Look up a wire literal. Matching is exact (case-sensitive).
    #[must_use]
    pub fn from_literal(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Phase group of this status.
    #[must_use]
    pub const fn phase(self) -> Phase {
        match self.ordinal() {
            0..=9 => Phase::PreRun,
            10..=99 => Phase::Running,
            100..=999 => Phase::Terminal,
            _ => Phase::Failure,
        }
    }

    /// Whether the session has reached an end state (ordinal >= 100).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.ordinal() >= 100
    }

    /// Whether a driver seeing this status must stop its run.
    #[must_use]
    pub const fn is_stop_worthy(self) -> bool {
        self.is_terminal() || matches!(self, Self::Cancelling)
    }

    /// Whether `next` follows `self` in the driver state machine:
    ///
    /// ```text
    /// pre-run -> STARTING -> RUNNING -> FINISHING  -> FINISHED | ABORTED
    ///                               \-> CANCELLING -> CANCELLED
    /// any non-terminal -> FAILED | FAULTY
    /// ```
    ///
    /// Pre-run states may move among themselves and straight to `RUNNING`.
    /// Re-asserting the current status is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.ordinal() == next.ordinal() {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::Failed | Self::Faulty) {
            return true;
        }
        match (self.phase(), next) {
            (Phase::PreRun, next) => {
                matches!(next.phase(), Phase::PreRun)
                    || matches!(next, Self::Starting | Self::Running | Self::Cancelling)
            }
            (_, Self::Running) => matches!(self, Self::Starting),
            (_, Self::Finishing | Self::Cancelling) => {
                matches!(self, Self::Starting | Self::Running)
            }
            (_, Self::Finished | Self::Aborted) => matches!(self, Self::Finishing),
            (_, Self::Cancelled) => matches!(self, Self::Cancelling),
            _ => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_literal(s).ok_or_else(|| {
            Error::Validation(format!(
                "the given status {s:?} is not within the allowed status strings: allowed are: {}",
                allowed_list()
            ))
        })
    }
}

/// Whether `s` is one of the known status literals.
#[must_use]
pub fn is_known(s: &str) -> bool {
    Status::from_literal(s).is_some()
}

/// Stop-worthiness of a status literal.
///
/// # Errors
///
/// Returns [`Error::Validation`] if `s` is not a known status literal.
pub fn is_stop_worthy_str(s: &str) -> Result<bool> {
    s.parse::<Status>().map(Status::is_stop_worthy)
}

/// Comma separated list of every status literal.
#[must_use]
pub fn allowed_list() -> String {
    Status::ALL
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_monotonic() {
        let ordinals: Vec<u16> = Status::ALL.iter().map(|s| s.ordinal()).collect();
        let mut sorted = ordinals.clone();
        sorted.sort_unstable();
        assert_eq!(ordinals, sorted);
    }

    #[test]
    fn test_literal_round_trip() {
        for status in Status::ALL {
            assert_eq!(Status::from_literal(status.as_str()), Some(status));
            assert_eq!(status.to_string(), status.as_str());
        }
        assert_eq!(Status::from_literal("running"), None);
    }

    #[test]
    fn test_stop_worthy() {
        assert!(Status::Cancelling.is_stop_worthy());
        assert!(!Status::Running.is_stop_worthy());
        assert!(!Status::Finishing.is_stop_worthy());
        assert!(Status::Finished.is_stop_worthy());
        assert!(Status::Faulty.is_stop_worthy());
    }

    #[test]
    fn test_stop_worthy_literal() {
        assert!(is_stop_worthy_str("CANCELLING").unwrap());
        assert!(!is_stop_worthy_str("RUNNING").unwrap());
        assert!(is_stop_worthy_str("FINISHED").unwrap());
        assert!(matches!(
            is_stop_worthy_str("NOT_A_STATUS"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(is_stop_worthy_str("cancelling"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_phase() {
        assert_eq!(Status::Hold.phase(), Phase::PreRun);
        assert_eq!(Status::Cancelling.phase(), Phase::Running);
        assert_eq!(Status::Aborted.phase(), Phase::Terminal);
        assert_eq!(Status::Cancelled.phase(), Phase::Failure);
    }

    #[test]
    fn test_serde_literal() {
        let json = serde_json::to_string(&Status::WaitingToRun).unwrap();
        assert_eq!(json, "\"WAITING_TO_RUN\"");
        let status: Status = serde_json::from_str("\"AWAITING_CHECK\"").unwrap();
        assert_eq!(status, Status::AwaitingCheck);
    }

    #[test]
    fn test_from_str_unknown() {
        let err = "NOT_A_STATUS".parse::<Status>().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("RUNNING"));
    }

    #[test]
    fn test_transitions() {
        use Status::*;
        assert!(WaitingToRun.can_transition_to(Running));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Finishing));
        assert!(Running.can_transition_to(Cancelling));
        assert!(Finishing.can_transition_to(Finished));
        assert!(Finishing.can_transition_to(Aborted));
        assert!(Cancelling.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Failed));
        assert!(Cancelling.can_transition_to(Faulty));
        assert!(Running.can_transition_to(Running));

        assert!(!Finished.can_transition_to(Running));
        assert!(!Running.can_transition_to(Finished));
        assert!(!Cancelling.can_transition_to(Finished));
        assert!(!Finishing.can_transition_to(Cancelled));
    }
}
