//! Input reservation shared by every mixing session
//!
//! A UTXO may be held by at most one session. Reservation of an input set
//! is all-or-nothing.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{OutPoint, SessionId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("Input {outpoint:?} is already reserved by {holder}")]
    AlreadyReserved { outpoint: OutPoint, holder: SessionId },

    #[error("Input {0:?} is listed twice")]
    DuplicateInput(OutPoint),
}

#[derive(Debug, Default)]
pub struct InputLockRegistry {
    locks: DashMap<OutPoint, SessionId>,
}

impl InputLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve every input for `session`, or none of them
    pub fn reserve(&self, session: SessionId, inputs: &[OutPoint]) -> Result<(), LockError> {
        let mut taken: Vec<OutPoint> = Vec::with_capacity(inputs.len());
        for outpoint in inputs {
            let conflict = match self.locks.entry(*outpoint) {
                Entry::Occupied(held) if *held.get() == session => Some(LockError::DuplicateInput(*outpoint)),
                Entry::Occupied(held) => Some(LockError::AlreadyReserved {
                    outpoint: *outpoint,
                    holder: *held.get(),
                }),
                Entry::Vacant(slot) => {
                    slot.insert(session);
                    None
                }
            };

            if let Some(err) = conflict {
                for undo in &taken {
                    self.locks.remove_if(undo, |_, holder| *holder == session);
                }
                log::debug!("{} could not reserve inputs: {}", session, err);
                return Err(err);
            }
            taken.push(*outpoint);
        }
        Ok(())
    }

    /// Release every input held by `session`; returns how many were freed
    pub fn release_session(&self, session: SessionId) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, holder| *holder != session);
        let released = before.saturating_sub(self.locks.len());
        if released > 0 {
            log::debug!("{} released {} inputs", session, released);
        }
        released
    }

    pub fn holder(&self, outpoint: &OutPoint) -> Option<SessionId> {
        self.locks.get(outpoint).map(|h| *h.value())
    }

    pub fn is_locked(&self, outpoint: &OutPoint) -> bool {
        self.locks.contains_key(outpoint)
    }

    pub fn held_by(&self, session: SessionId) -> Vec<OutPoint> {
        let mut held: Vec<OutPoint> = self
            .locks
            .iter()
            .filter(|e| *e.value() == session)
            .map(|e| *e.key())
            .collect();
        held.sort();
        held
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
