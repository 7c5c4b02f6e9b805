//! Mixing session state machine

use std::fmt;
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};

use crate::consensus_params::obfuscation::{QUEUE_TIMEOUT_SECS, SIGNING_TIMEOUT_SECS};
use crate::denomination::Denomination;

use super::{InputCommitment, OutPoint, SessionId};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Queued,
    Accepted,
    Signing,
    Complete,
    TimedOut,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete | SessionState::TimedOut | SessionState::Failed)
    }

    /// Whether the state machine permits `self -> next`
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Queued)
                | (Queued, Accepted)
                | (Accepted, Signing)
                | (Signing, Complete)
                | (Queued, TimedOut)
                | (Accepted, TimedOut)
                | (Signing, TimedOut)
                | (Queued, Failed)
                | (Accepted, Failed)
                | (Signing, Failed)
        )
    }

    /// Status text shown to the user
    pub fn status_text(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Queued => "queued",
            SessionState::Accepted => "accepted",
            SessionState::Signing => "signing",
            SessionState::Complete => "complete",
            SessionState::TimedOut => "timed out",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_text())
    }
}

/// One mixing round owned by the session manager
#[derive(Debug, Clone)]
pub struct ObfuscationSession {
    pub session_id: SessionId,
    pub denomination: Denomination,
    /// Our inputs first, then other participants' as the coordinator reports them
    pub participants: Vec<InputCommitment>,
    pub collateral: OutPoint,
    /// Incremented on every state change
    pub round: u32,
    pub state: SessionState,
    pub deadline: Option<Instant>,
}

impl ObfuscationSession {
    pub fn new(
        session_id: SessionId,
        denomination: Denomination,
        inputs: Vec<InputCommitment>,
        collateral: OutPoint,
    ) -> Self {
        Self {
            session_id,
            denomination,
            participants: inputs,
            collateral,
            round: 0,
            state: SessionState::Idle,
            deadline: None,
        }
    }

    /// Move to `next`, resetting the deadline for the new state.
    ///
    /// Returns false, leaving the session untouched, for a transition the
    /// state machine does not allow.
    pub fn transition(&mut self, next: SessionState, now: Instant) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        log::debug!("{} {} -> {}", self.session_id, self.state, next);
        self.state = next;
        self.round += 1;
        self.deadline = match next {
            SessionState::Queued | SessionState::Accepted => Some(now + Duration::from_secs(QUEUE_TIMEOUT_SECS)),
            SessionState::Signing => Some(now + Duration::from_secs(SIGNING_TIMEOUT_SECS)),
            _ => None,
        };
        true
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        !self.state.is_terminal() && self.deadline.map_or(false, |deadline| now >= deadline)
    }

    /// Outpoints this session holds locked
    pub fn reserved_inputs(&self, own_inputs: usize) -> Vec<OutPoint> {
        self.participants
            .iter()
            .take(own_inputs)
            .map(|input| input.outpoint)
            .chain(std::iter::once(self.collateral))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ObfuscationSession {
        ObfuscationSession::new(
            SessionId(1),
            Denomination::Ten,
            vec![InputCommitment {
                outpoint: OutPoint::new([1u8; 32], 0),
                value: Denomination::Ten.amount(),
            }],
            OutPoint::new([2u8; 32], 0),
        )
    }

    #[test]
    fn test_happy_path_and_deadlines() {
        let mut s = session();
        let now = Instant::now();

        assert!(s.transition(SessionState::Queued, now));
        assert_eq!(s.deadline, Some(now + Duration::from_secs(30)));
        assert!(s.transition(SessionState::Accepted, now));
        assert!(s.transition(SessionState::Signing, now));
        assert_eq!(s.deadline, Some(now + Duration::from_secs(15)));
        assert!(s.transition(SessionState::Complete, now));
        assert_eq!(s.deadline, None);
        assert_eq!(s.round, 4);
    }

    #[test]
    fn test_illegal_transitions() {
        let mut s = session();
        let now = Instant::now();
        assert!(!s.transition(SessionState::Signing, now));
        assert!(!s.transition(SessionState::TimedOut, now));

        s.transition(SessionState::Queued, now);
        s.transition(SessionState::TimedOut, now);
        assert!(!s.transition(SessionState::Failed, now));
        assert!(!s.transition(SessionState::TimedOut, now));
        assert_eq!(s.round, 2);
    }

    #[test]
    fn test_expiry() {
        let mut s = session();
        let now = Instant::now();
        assert!(!s.is_expired(now));
        s.transition(SessionState::Queued, now);
        assert!(!s.is_expired(now + Duration::from_secs(29)));
        assert!(s.is_expired(now + Duration::from_secs(30)));
        assert_eq!(s.reserved_inputs(1).len(), 2);
    }
}
