/// Pure publish state machine
///
/// Every persisted status change is validated here first; the stores apply
/// the transition with a compare-and-set so racing writers cannot corrupt a
/// row's lifecycle.
use crate::db::models::PostStatus;

/// Events that drive a post through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishEvent {
    Lease,
    ContainerCreated,
    PublishSucceeded,
    RetryableFailure,
    TerminalFailure,
    Cancel,
    LeaseExpired,
}

/// Why a transition was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: PostStatus,
    pub event: PublishEvent,
}

/// Compute the successor state for `(state, event)`
pub fn next(state: PostStatus, event: PublishEvent) -> Result<PostStatus, InvalidTransition> {
    use PostStatus::*;
    use PublishEvent::*;

    if state.is_terminal() {
        return Err(InvalidTransition { from: state, event });
    }

    let to = match (state, event) {
        (Scheduled, Lease) => Leased,
        (Leased, ContainerCreated) => Publishing,
        (Publishing, PublishSucceeded) => Posted,
        (Leased | Publishing, RetryableFailure) => Scheduled,
        (Scheduled | Leased | Publishing, TerminalFailure) => Failed,
        (Scheduled | Leased | Publishing, Cancel) => Cancelled,
        (Leased | Publishing, LeaseExpired) => Scheduled,
        (from, event) => return Err(InvalidTransition { from, event }),
    };
    Ok(to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use PostStatus::*;
    use PublishEvent::*;

    #[test]
    fn happy_path() {
        let mut state = Scheduled;
        for event in [Lease, ContainerCreated, PublishSucceeded] {
            state = next(state, event).unwrap();
        }
        assert_eq!(state, Posted);
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for terminal in [Posted, Failed, Cancelled] {
            for event in [
                Lease,
                ContainerCreated,
                PublishSucceeded,
                RetryableFailure,
                TerminalFailure,
                Cancel,
                LeaseExpired,
            ] {
                assert!(next(terminal, event).is_err());
            }
        }
    }

    #[test]
    fn retry_returns_to_scheduled() {
        assert_eq!(next(Publishing, RetryableFailure).unwrap(), Scheduled);
        assert_eq!(next(Leased, RetryableFailure).unwrap(), Scheduled);
    }

    #[test]
    fn cancel_only_before_completion() {
        assert_eq!(next(Leased, Cancel).unwrap(), Cancelled);
        assert_eq!(next(Publishing, Cancel).unwrap(), Cancelled);
        assert!(next(Posted, Cancel).is_err());
    }

    #[test]
    fn expired_lease_is_schedulable_again() {
        assert_eq!(next(Leased, LeaseExpired).unwrap(), Scheduled);
        assert_eq!(next(Publishing, LeaseExpired).unwrap(), Scheduled);
        assert!(next(Scheduled, LeaseExpired).is_err());
    }
}
