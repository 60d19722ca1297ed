use super::ProtocolError;
use crate::messages::ProtocolName;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        })
    }
}

/// Lifecycle of one protocol run.
///
/// `Initiated → AwaitingCounterpartySignature → Validating → Committed`,
/// responders skip the waiting state. Any non-terminal state may go to
/// `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initiated,
    AwaitingCounterpartySignature,
    Validating,
    Committed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Committed | RunState::Aborted)
    }

    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Initiated, AwaitingCounterpartySignature)
            | (Initiated, Validating)
            | (AwaitingCounterpartySignature, Validating)
            | (Validating, Committed) => true,
            (current, Aborted) => !current.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Run {
    protocol: ProtocolName,
    role: Role,
    state: RunState,
}

impl Run {
    pub(crate) fn new(protocol: ProtocolName, role: Role) -> Self {
        Self {
            protocol,
            role,
            state: RunState::Initiated,
        }
    }

    pub(crate) fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "{} {}: {:?} -> {:?}",
            self.protocol,
            self.role,
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "run state");
        self.state = next;
    }

    pub(crate) fn abort(&mut self, error: &ProtocolError) {
        if !self.state.is_terminal() {
            warn!(from = ?self.state, %error, "run aborted");
            self.state = RunState::Aborted;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        use RunState::*;
        assert!(Initiated.can_advance_to(AwaitingCounterpartySignature));
        assert!(Initiated.can_advance_to(Validating));
        assert!(Validating.can_advance_to(Committed));
        assert!(AwaitingCounterpartySignature.can_advance_to(Aborted));
        assert!(!Initiated.can_advance_to(Committed));
        assert!(!Committed.can_advance_to(Aborted));
        assert!(!Aborted.can_advance_to(Validating));
    }

    #[test]
    fn abort_is_final() {
        let mut run = Run::new(ProtocolName::Install, Role::Initiator);
        run.advance(RunState::AwaitingCounterpartySignature);
        run.abort(&ProtocolError::CounterpartyTimeout("bob".into()));
        assert_eq!(run.state, RunState::Aborted);
        run.abort(&ProtocolError::CounterpartyTimeout("bob".into()));
        assert_eq!(run.state, RunState::Aborted);
    }
}
