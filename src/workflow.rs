//! Approval chain: transition table and role gating.
//!
//! Every mutating engine operation goes through [`authorize`] and
//! [`next_status`]; nothing else decides who may act or where a booking goes.

use crate::model::{Role, Stage, Status};

/// What an approver does to a booking at its current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Approve,
    Reject,
}

/// Role allowed to act on a booking in `status`. `None` for terminal states.
pub fn required_role(status: Status) -> Option<Role> {
    status.stage().map(Stage::role)
}

/// Transition table: `(current, action) → next`. `None` if no transition exists.
pub fn next_status(status: Status, action: Action) -> Option<Status> {
    use Action::*;
    use Status::*;
    match (status, action) {
        (PendingFaculty, Approve) => Some(PendingHod),
        (PendingHod, Approve) => Some(PendingAdmin),
        (PendingAdmin, Approve) => Some(Confirmed),
        (PendingFaculty | PendingHod | PendingAdmin, Reject) => Some(Rejected),
        (Confirmed | Rejected, _) => None,
    }
}

/// Why an actor may not act on a booking right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// The caller acted on a status it observed earlier that is no longer current.
    Stale { expected: Status },
    /// Booking is confirmed or rejected.
    Terminal,
    /// The actor's stage has already been passed; acting again is a stale repeat.
    StagePassed { stage: Stage },
    /// Actor holds a role other than the one this stage requires.
    WrongRole { required: Role },
}

/// Decide whether `role` may act on a booking in `status`.
///
/// `expected` is the status the caller last observed; when given it acts as
/// a compare-and-swap guard. Returns the stage the actor acts at.
pub fn authorize(status: Status, role: Role, expected: Option<Status>) -> Result<Stage, Denial> {
    if let Some(expected) = expected
        && expected != status
    {
        return Err(Denial::Stale { expected });
    }
    let Some(current) = status.stage() else {
        return Err(Denial::Terminal);
    };
    match Stage::for_role(role) {
        Some(own) if own == current => Ok(current),
        Some(own) if own < current => Err(Denial::StagePassed { stage: own }),
        _ => Err(Denial::WrongRole {
            required: current.role(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [Status; 5] = [
        Status::PendingFaculty,
        Status::PendingHod,
        Status::PendingAdmin,
        Status::Confirmed,
        Status::Rejected,
    ];
    const ALL_ROLES: [Role; 4] = [Role::Requester, Role::Faculty, Role::Hod, Role::Admin];

    #[test]
    fn required_roles() {
        assert_eq!(required_role(Status::PendingFaculty), Some(Role::Faculty));
        assert_eq!(required_role(Status::PendingHod), Some(Role::Hod));
        assert_eq!(required_role(Status::PendingAdmin), Some(Role::Admin));
        assert_eq!(required_role(Status::Confirmed), None);
        assert_eq!(required_role(Status::Rejected), None);
    }

    #[test]
    fn approve_chain_is_linear() {
        let mut status = Status::PendingFaculty;
        let mut seen = vec![status];
        while let Some(next) = next_status(status, Action::Approve) {
            status = next;
            seen.push(status);
        }
        assert_eq!(
            seen,
            vec![
                Status::PendingFaculty,
                Status::PendingHod,
                Status::PendingAdmin,
                Status::Confirmed,
            ]
        );
    }

    #[test]
    fn reject_from_every_pending_state() {
        for status in ALL_STATUSES {
            let next = next_status(status, Action::Reject);
            if status.is_terminal() {
                assert_eq!(next, None, "{status}");
            } else {
                assert_eq!(next, Some(Status::Rejected), "{status}");
            }
        }
    }

    #[test]
    fn only_required_role_is_authorized() {
        for status in ALL_STATUSES {
            for role in ALL_ROLES {
                let ok = authorize(status, role, None).is_ok();
                assert_eq!(ok, required_role(status) == Some(role), "{status} / {role}");
            }
        }
    }

    #[test]
    fn requester_is_wrong_role_everywhere_pending() {
        for status in [Status::PendingFaculty, Status::PendingHod, Status::PendingAdmin] {
            assert!(matches!(
                authorize(status, Role::Requester, None),
                Err(Denial::WrongRole { .. })
            ));
        }
    }

    #[test]
    fn earlier_tier_acting_again_is_stage_passed() {
        assert_eq!(
            authorize(Status::PendingHod, Role::Faculty, None),
            Err(Denial::StagePassed { stage: Stage::Faculty })
        );
        assert_eq!(
            authorize(Status::PendingAdmin, Role::Hod, None),
            Err(Denial::StagePassed { stage: Stage::Hod })
        );
    }

    #[test]
    fn later_tier_acting_early_is_wrong_role() {
        assert_eq!(
            authorize(Status::PendingFaculty, Role::Admin, None),
            Err(Denial::WrongRole { required: Role::Faculty })
        );
    }

    #[test]
    fn terminal_beats_role_check() {
        for role in ALL_ROLES {
            assert_eq!(authorize(Status::Confirmed, role, None), Err(Denial::Terminal));
            assert_eq!(authorize(Status::Rejected, role, None), Err(Denial::Terminal));
        }
    }

    #[test]
    fn expected_status_guard() {
        assert_eq!(
            authorize(Status::PendingHod, Role::Hod, Some(Status::PendingHod)),
            Ok(Stage::Hod)
        );
        assert_eq!(
            authorize(Status::PendingAdmin, Role::Hod, Some(Status::PendingHod)),
            Err(Denial::Stale {
                expected: Status::PendingHod
            })
        );
    }
}
