//! Failure classification against per-call-site expected-error tables.
//!
//! Different call sites tolerate different failure sets: `NOT_FOUND` is
//! expected while enumerating outputs that may have been unplugged, but never
//! while acquiring a frame. Using the wrong table at a call site is a
//! correctness bug, so every table is a named variant rather than a slice
//! passed around by hand.

use tracing::error;

use crate::status::Status;

/// The verdict for a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// A known, recoverable system transition. The pipeline is unwound and
    /// rebuilt after a backoff.
    Expected,
    /// Anything else. The pipeline terminates.
    Unexpected,
}

/// The expected-error table for one category of call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedErrors {
    /// General device and desktop-transition calls.
    SystemTransitions,
    /// Duplication-source creation.
    CreateDuplication,
    /// Per-frame info retrieval.
    FrameInfo,
    /// Output enumeration.
    EnumOutputs,
}

impl ExpectedErrors {
    /// The statuses this table treats as expected.
    pub const fn statuses(self) -> &'static [Status] {
        match self {
            Self::SystemTransitions => &[
                Status::DEVICE_REMOVED,
                Status::ACCESS_LOST,
                Status::WAIT_ABANDONED,
            ],
            Self::CreateDuplication => &[
                Status::DEVICE_REMOVED,
                Status::ACCESS_DENIED,
                Status::SESSION_DISCONNECTED,
            ],
            Self::FrameInfo => &[Status::DEVICE_REMOVED, Status::ACCESS_LOST],
            Self::EnumOutputs => &[Status::NOT_FOUND],
        }
    }

    /// Set-membership test against this table.
    pub fn contains(self, status: Status) -> bool {
        self.statuses().contains(&status)
    }
}

/// The result of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Whether the failure is expected (retry) or unexpected (fatal).
    pub verdict: Verdict,
    /// The status after device-removed-reason normalization. This is the
    /// status callers should report; the device's own diagnosis is more
    /// authoritative than the failing call's return code.
    pub status: Status,
}

impl Classification {
    /// Returns whether the failure is expected.
    pub const fn is_expected(&self) -> bool {
        matches!(self.verdict, Verdict::Expected)
    }
}

/// Classify a raw failure status against an expected-error table.
///
/// When the caller has a GPU device at hand, `removed_reason` carries the
/// device's removed-reason query. Device-removed, device-reset and
/// out-of-memory reasons are facets of the same underlying failure and are
/// normalized to the canonical device-removed status before lookup; any other
/// non-ok reason replaces the original status outright.
///
/// The duplication-session-limit status is always fatal regardless of table;
/// retrying cannot succeed while another application holds the session.
///
/// Pure in its three inputs. An unexpected verdict is logged with the decoded
/// status as a side effect.
pub fn classify(
    removed_reason: Option<Status>,
    status: Status,
    table: ExpectedErrors,
) -> Classification {
    let status = match removed_reason {
        Some(Status::DEVICE_REMOVED) | Some(Status::DEVICE_RESET) | Some(Status::OUT_OF_MEMORY) => {
            Status::DEVICE_REMOVED
        }
        Some(reason) if !reason.is_ok() => reason,
        _ => status,
    };

    if status == Status::DUPLICATION_UNAVAILABLE {
        error!(
            "The maximum number of applications using desktop duplication has been reached: \
             {status}"
        );
        return Classification {
            verdict: Verdict::Unexpected,
            status,
        };
    }

    let verdict = if table.contains(status) {
        Verdict::Expected
    } else {
        error!("Unexpected failure in {table:?} call: {status}");
        Verdict::Unexpected
    };

    Classification { verdict, status }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_membership_is_per_call_site() {
        assert!(ExpectedErrors::EnumOutputs.contains(Status::NOT_FOUND));
        assert!(!ExpectedErrors::FrameInfo.contains(Status::NOT_FOUND));
        assert!(!ExpectedErrors::SystemTransitions.contains(Status::NOT_FOUND));
    }

    #[test]
    fn session_switch_denial_is_expected_only_during_setup() {
        // A session switch surfaces as ACCESS_DENIED while (re)building the
        // duplication side; there it must unwind for retry.
        let setup = classify(
            None,
            Status::ACCESS_DENIED,
            ExpectedErrors::CreateDuplication,
        );
        assert_eq!(setup.verdict, Verdict::Expected);

        let general = classify(
            None,
            Status::ACCESS_DENIED,
            ExpectedErrors::SystemTransitions,
        );
        assert_eq!(general.verdict, Verdict::Unexpected);
    }

    #[test]
    fn frame_acquire_loss_is_expected() {
        let acquire = classify(None, Status::ACCESS_LOST, ExpectedErrors::FrameInfo);
        assert_eq!(acquire.verdict, Verdict::Expected);
    }

    #[test]
    fn removed_reason_facets_normalize_to_device_removed() {
        for reason in [
            Status::DEVICE_REMOVED,
            Status::DEVICE_RESET,
            Status::OUT_OF_MEMORY,
        ] {
            let classification = classify(
                Some(reason),
                Status::ACCESS_DENIED,
                ExpectedErrors::SystemTransitions,
            );
            assert_eq!(classification.status, Status::DEVICE_REMOVED);
            assert_eq!(classification.verdict, Verdict::Expected);
        }
    }

    #[test]
    fn other_removed_reason_replaces_status() {
        let classification = classify(
            Some(Status(0x8000_4005_u32 as i32)),
            Status::ACCESS_LOST,
            ExpectedErrors::SystemTransitions,
        );
        assert_eq!(classification.status, Status(0x8000_4005_u32 as i32));
        assert_eq!(classification.verdict, Verdict::Unexpected);
    }

    #[test]
    fn ok_removed_reason_leaves_status_untouched() {
        let classification = classify(
            Some(Status::OK),
            Status::ACCESS_LOST,
            ExpectedErrors::SystemTransitions,
        );
        assert_eq!(classification.status, Status::ACCESS_LOST);
        assert_eq!(classification.verdict, Verdict::Expected);
    }

    #[test]
    fn classification_is_deterministic() {
        let a = classify(None, Status::ACCESS_LOST, ExpectedErrors::FrameInfo);
        let b = classify(None, Status::ACCESS_LOST, ExpectedErrors::FrameInfo);
        assert_eq!(a, b);
        assert_eq!(a.verdict, Verdict::Expected);
    }

    #[test]
    fn duplication_limit_is_fatal_in_every_table() {
        for table in [
            ExpectedErrors::SystemTransitions,
            ExpectedErrors::CreateDuplication,
            ExpectedErrors::FrameInfo,
            ExpectedErrors::EnumOutputs,
        ] {
            let classification = classify(None, Status::DUPLICATION_UNAVAILABLE, table);
            assert_eq!(classification.verdict, Verdict::Unexpected);
            assert_eq!(classification.status, Status::DUPLICATION_UNAVAILABLE);
        }
    }
}
