//! Wallet-wide consensus fault state
//!
//! A divergent checkpoint or corrupted mint history halts new mint and spend
//! issuance for the affected denomination until an explicit resync.

use std::sync::Arc;
use dashmap::DashMap;

use crate::denomination::Denomination;

#[derive(Debug, Clone, Default)]
pub struct FaultState {
    halted: Arc<DashMap<Denomination, String>>,
}

impl FaultState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Halt a denomination; the first recorded reason is kept
    pub fn halt(&self, denomination: Denomination, reason: impl Into<String>) {
        let reason = reason.into();
        log::error!("halting denomination {}: {}", denomination, reason);
        self.halted.entry(denomination).or_insert(reason);
    }

    pub fn is_halted(&self, denomination: Denomination) -> bool {
        self.halted.contains_key(&denomination)
    }

    pub fn reason(&self, denomination: Denomination) -> Option<String> {
        self.halted.get(&denomination).map(|r| r.value().clone())
    }

    /// Lift the halt after resynchronization
    pub fn clear(&self, denomination: Denomination) {
        if self.halted.remove(&denomination).is_some() {
            log::info!("denomination {} resynchronized, issuance resumed", denomination);
        }
    }

    pub fn halted_denominations(&self) -> Vec<Denomination> {
        let mut halted: Vec<Denomination> = self.halted.iter().map(|e| *e.key()).collect();
        halted.sort();
        halted
    }

    pub fn is_faulted(&self) -> bool {
        !self.halted.is_empty()
    }
}
