//! Pool message catalogue exchanged with the coordinator

use serde::{Deserialize, Serialize};

/// Condition codes reported by a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolMessage {
    ErrAlreadyHave,
    ErrDenom,
    ErrEntriesFull,
    ErrExistingTx,
    ErrFees,
    ErrInvalidCollateral,
    ErrInvalidInput,
    ErrInvalidScript,
    ErrInvalidTx,
    ErrMaximum,
    ErrMnList,
    ErrMode,
    ErrNonStandardPubkey,
    ErrNotAMn,
    ErrQueueFull,
    ErrRecent,
    ErrSession,
    ErrMissingTx,
    ErrVersion,
    MsgNoErr,
    MsgSuccess,
    MsgEntriesAdded,
}

impl PoolMessage {
    pub const ALL: [PoolMessage; 22] = [
        PoolMessage::ErrAlreadyHave,
        PoolMessage::ErrDenom,
        PoolMessage::ErrEntriesFull,
        PoolMessage::ErrExistingTx,
        PoolMessage::ErrFees,
        PoolMessage::ErrInvalidCollateral,
        PoolMessage::ErrInvalidInput,
        PoolMessage::ErrInvalidScript,
        PoolMessage::ErrInvalidTx,
        PoolMessage::ErrMaximum,
        PoolMessage::ErrMnList,
        PoolMessage::ErrMode,
        PoolMessage::ErrNonStandardPubkey,
        PoolMessage::ErrNotAMn,
        PoolMessage::ErrQueueFull,
        PoolMessage::ErrRecent,
        PoolMessage::ErrSession,
        PoolMessage::ErrMissingTx,
        PoolMessage::ErrVersion,
        PoolMessage::MsgNoErr,
        PoolMessage::MsgSuccess,
        PoolMessage::MsgEntriesAdded,
    ];

    /// Wire id of the message
    pub fn id(&self) -> u32 {
        *self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// User-facing text
    pub fn text(&self) -> &'static str {
        match self {
            PoolMessage::ErrAlreadyHave => "Already have that input.",
            PoolMessage::ErrDenom => "No matching denominations found for mixing.",
            PoolMessage::ErrEntriesFull => "Entries are full.",
            PoolMessage::ErrExistingTx => "Not compatible with existing transactions.",
            PoolMessage::ErrFees => "Transaction fees are too high.",
            PoolMessage::ErrInvalidCollateral => "Collateral not valid.",
            PoolMessage::ErrInvalidInput => "Input is not valid.",
            PoolMessage::ErrInvalidScript => "Invalid script detected.",
            PoolMessage::ErrInvalidTx => "Transaction not valid.",
            PoolMessage::ErrMaximum => "Value more than Obfuscation pool maximum allows.",
            PoolMessage::ErrMnList => "Not in the Masternode list.",
            PoolMessage::ErrMode => "Incompatible mode.",
            PoolMessage::ErrNonStandardPubkey => "Non-standard public key detected.",
            PoolMessage::ErrNotAMn => "This is not a Masternode.",
            PoolMessage::ErrQueueFull => "Masternode queue is full.",
            PoolMessage::ErrRecent => "Last Obfuscation was too recent.",
            PoolMessage::ErrSession => "Session not complete!",
            PoolMessage::ErrMissingTx => "Missing input transaction information.",
            PoolMessage::ErrVersion => "Incompatible version.",
            PoolMessage::MsgNoErr => "No errors detected.",
            PoolMessage::MsgSuccess => "Transaction created successfully.",
            PoolMessage::MsgEntriesAdded => "Your entries added successfully.",
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            PoolMessage::MsgNoErr | PoolMessage::MsgSuccess | PoolMessage::MsgEntriesAdded
        )
    }

    /// Rejections caused by the coordinator's load rather than our request
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            PoolMessage::ErrQueueFull | PoolMessage::ErrEntriesFull | PoolMessage::ErrRecent
        )
    }

    /// Rejections caused by an incompatible client
    pub fn is_incompatible(&self) -> bool {
        matches!(self, PoolMessage::ErrMode | PoolMessage::ErrVersion | PoolMessage::ErrExistingTx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_roundtrip() {
        for message in PoolMessage::ALL {
            assert_eq!(PoolMessage::from_id(message.id()), Some(message));
        }
        assert_eq!(PoolMessage::from_id(22), None);
        assert_eq!(PoolMessage::ErrAlreadyHave.id(), 0);
        assert_eq!(PoolMessage::MsgEntriesAdded.id(), 21);
    }

    #[test]
    fn test_texts() {
        assert_eq!(PoolMessage::ErrAlreadyHave.text(), "Already have that input.");
        assert_eq!(PoolMessage::ErrMode.text(), "Incompatible mode.");
        assert_eq!(PoolMessage::ErrInvalidCollateral.text(), "Collateral not valid.");
        assert!(!PoolMessage::MsgSuccess.is_error());
        assert!(PoolMessage::ErrQueueFull.is_capacity());
    }
}
