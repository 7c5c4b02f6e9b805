//! Anti-spam collateral checks for mixing requests

use serde::{Deserialize, Serialize};

use crate::consensus_params::obfuscation::{COLLATERAL, MAX_COLLATERAL};
use crate::consensus_params::Amount;

use super::{InputLockRegistry, OutPoint, PoolMessage};

/// Input offered as collateral for a session request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralCandidate {
    pub outpoint: OutPoint,
    pub value: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateralVerdict {
    pub valid: bool,
    pub reason: Option<String>,
}

impl CollateralVerdict {
    fn accept() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn reject(reason: String) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// Checks collateral size and that no in-flight session already holds it
#[derive(Debug, Clone, Copy)]
pub struct CollateralValidator {
    min: Amount,
    max: Amount,
}

impl Default for CollateralValidator {
    fn default() -> Self {
        Self {
            min: COLLATERAL,
            max: MAX_COLLATERAL,
        }
    }
}

impl CollateralValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self, candidate: &CollateralCandidate, locks: &InputLockRegistry) -> CollateralVerdict {
        if candidate.value < self.min || candidate.value > self.max {
            return CollateralVerdict::reject(format!(
                "{} (value {} outside {}..={})",
                PoolMessage::ErrInvalidCollateral.text(),
                candidate.value,
                self.min,
                self.max
            ));
        }
        if let Some(holder) = locks.holder(&candidate.outpoint) {
            return CollateralVerdict::reject(format!(
                "{} (reserved by {})",
                PoolMessage::ErrInvalidCollateral.text(),
                holder
            ));
        }
        CollateralVerdict::accept()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obfuscation::SessionId;

    #[test]
    fn test_collateral_band() {
        let validator = CollateralValidator::new();
        let locks = InputLockRegistry::new();
        let candidate = |value| CollateralCandidate {
            outpoint: OutPoint::new([1u8; 32], 0),
            value,
        };

        assert!(validator.validate(&candidate(COLLATERAL), &locks).valid);
        assert!(validator.validate(&candidate(MAX_COLLATERAL), &locks).valid);
        let low = validator.validate(&candidate(COLLATERAL - 1), &locks);
        assert!(!low.valid);
        assert!(low.reason.unwrap().starts_with("Collateral not valid."));
        assert!(!validator.validate(&candidate(MAX_COLLATERAL + 1), &locks).valid);
    }

    #[test]
    fn test_reserved_collateral_rejected() {
        let validator = CollateralValidator::new();
        let locks = InputLockRegistry::new();
        let outpoint = OutPoint::new([2u8; 32], 1);
        locks.reserve(SessionId(4), &[outpoint]).unwrap();

        let verdict = validator.validate(&CollateralCandidate { outpoint, value: COLLATERAL }, &locks);
        assert!(!verdict.valid);
    }
}
