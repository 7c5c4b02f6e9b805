//! Masternode coordinator interface
//!
//! The coordinator is an external actor. Requests go out through
//! [`MasternodeCoordinator`]; its responses arrive asynchronously as
//! [`CoordinatorEvent`]s on a channel the session manager drains.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::consensus_params::obfuscation::POOL_MAX_TRANSACTIONS;
use crate::consensus_params::{domain_hash, domains, generate_txid};
use crate::denomination::Denomination;

use super::{CollateralCandidate, InputCommitment, OutPoint, PoolMessage, Secp256k1InputSigner, SessionId, SignedInput};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Masternode unreachable: {0}")]
    Unreachable(String),

    #[error("Masternode queue is full")]
    QueueFull,

    #[error("Request rejected: {}", .0.text())]
    Rejected(PoolMessage),
}

/// Outbound request to join a mixing pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub session_id: SessionId,
    pub denomination: Denomination,
    pub inputs: Vec<InputCommitment>,
    pub collateral: CollateralCandidate,
}

/// Our signatures for the joint transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureSubmission {
    pub session_id: SessionId,
    pub signatures: Vec<SignedInput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEventKind {
    /// Enough participants joined; the full input set of the round
    Accepted { participants: Vec<InputCommitment> },
    /// Joint transaction assembled and ready to sign
    FinalTransaction { tx_hash: [u8; 32] },
    /// All signatures collected and the transaction broadcast
    Complete { txid: [u8; 32] },
    Rejected(PoolMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorEvent {
    pub session_id: SessionId,
    pub kind: CoordinatorEventKind,
}

/// Message-passing interface to the coordinating masternode
pub trait MasternodeCoordinator: Send + Sync {
    fn submit_request(&self, request: SessionRequest) -> Result<(), CoordinatorError>;

    fn submit_signatures(&self, submission: SignatureSubmission) -> Result<(), CoordinatorError>;
}

/// How the in-process coordinator responds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedBehavior {
    /// Accept, finalize and complete every request
    Cooperative,
    /// Never respond
    Silent,
    /// Accept but never produce a final transaction
    StallAfterAccept,
    /// Reject every request with the given message
    Reject(PoolMessage),
    Unreachable,
    QueueFull,
}

/// In-process coordinator for tests and the simulator
pub struct SimulatedCoordinator {
    behavior: Mutex<SimulatedBehavior>,
    events: mpsc::UnboundedSender<CoordinatorEvent>,
    requests: Mutex<Vec<SessionRequest>>,
}

impl SimulatedCoordinator {
    pub fn new(behavior: SimulatedBehavior) -> (Self, mpsc::UnboundedReceiver<CoordinatorEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                behavior: Mutex::new(behavior),
                events,
                requests: Mutex::new(Vec::new()),
            },
            receiver,
        )
    }

    pub fn set_behavior(&self, behavior: SimulatedBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn requests(&self) -> Vec<SessionRequest> {
        self.requests.lock().clone()
    }

    /// Inject an arbitrary event, as if it came from the network
    pub fn emit(&self, session_id: SessionId, kind: CoordinatorEventKind) {
        if self.events.send(CoordinatorEvent { session_id, kind }).is_err() {
            log::warn!("simulated coordinator has no listener for {}", session_id);
        }
    }

    fn peers_for(request: &SessionRequest) -> Vec<InputCommitment> {
        let missing = POOL_MAX_TRANSACTIONS.saturating_sub(1);
        (0..missing)
            .map(|i| InputCommitment {
                outpoint: OutPoint::new(
                    domain_hash(&domains::SESSION_MESSAGE, &[&request.session_id.0.to_be_bytes(), &[i as u8]]),
                    i as u32,
                ),
                value: request.denomination.amount(),
            })
            .collect()
    }

    fn final_tx_hash(session_id: SessionId, participants: &[InputCommitment]) -> [u8; 32] {
        let mut body = session_id.0.to_be_bytes().to_vec();
        for participant in participants {
            body.extend_from_slice(&participant.outpoint.to_bytes());
        }
        generate_txid(&body)
    }
}

impl MasternodeCoordinator for SimulatedCoordinator {
    fn submit_request(&self, request: SessionRequest) -> Result<(), CoordinatorError> {
        let behavior = *self.behavior.lock();
        match behavior {
            SimulatedBehavior::Unreachable => {
                return Err(CoordinatorError::Unreachable("simulated masternode offline".to_string()))
            }
            SimulatedBehavior::QueueFull => return Err(CoordinatorError::QueueFull),
            _ => {}
        }
        self.requests.lock().push(request.clone());

        match behavior {
            SimulatedBehavior::Cooperative | SimulatedBehavior::StallAfterAccept => {
                let mut participants = request.inputs.clone();
                participants.extend(Self::peers_for(&request));
                self.emit(
                    request.session_id,
                    CoordinatorEventKind::Accepted {
                        participants: participants.clone(),
                    },
                );
                if behavior == SimulatedBehavior::Cooperative {
                    let tx_hash = Self::final_tx_hash(request.session_id, &participants);
                    self.emit(request.session_id, CoordinatorEventKind::FinalTransaction { tx_hash });
                }
            }
            SimulatedBehavior::Reject(message) => {
                self.emit(request.session_id, CoordinatorEventKind::Rejected(message));
            }
            _ => {}
        }
        Ok(())
    }

    fn submit_signatures(&self, submission: SignatureSubmission) -> Result<(), CoordinatorError> {
        let request = self
            .requests
            .lock()
            .iter()
            .find(|r| r.session_id == submission.session_id)
            .cloned()
            .ok_or(CoordinatorError::Rejected(PoolMessage::ErrSession))?;

        let mut participants = request.inputs.clone();
        participants.extend(Self::peers_for(&request));
        let tx_hash = Self::final_tx_hash(request.session_id, &participants);

        let all_valid = submission.signatures.len() == request.inputs.len()
            && submission
                .signatures
                .iter()
                .all(|s| Secp256k1InputSigner::verify(s, submission.session_id, &tx_hash).unwrap_or(false));

        if all_valid {
            self.emit(submission.session_id, CoordinatorEventKind::Complete { txid: tx_hash });
        } else {
            self.emit(submission.session_id, CoordinatorEventKind::Rejected(PoolMessage::ErrInvalidInput));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus_params::obfuscation::COLLATERAL;

    fn request(id: u64) -> SessionRequest {
        SessionRequest {
            session_id: SessionId(id),
            denomination: Denomination::Ten,
            inputs: vec![InputCommitment {
                outpoint: OutPoint::new([1u8; 32], 0),
                value: Denomination::Ten.amount(),
            }],
            collateral: CollateralCandidate {
                outpoint: OutPoint::new([2u8; 32], 0),
                value: COLLATERAL,
            },
        }
    }

    #[test]
    fn test_cooperative_round() {
        let (coordinator, mut events) = SimulatedCoordinator::new(SimulatedBehavior::Cooperative);
        coordinator.submit_request(request(1)).unwrap();

        let accepted = events.try_recv().unwrap();
        match accepted.kind {
            CoordinatorEventKind::Accepted { participants } => assert_eq!(participants.len(), POOL_MAX_TRANSACTIONS),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            events.try_recv().unwrap().kind,
            CoordinatorEventKind::FinalTransaction { .. }
        ));
    }

    #[test]
    fn test_failure_behaviors() {
        let (coordinator, mut events) = SimulatedCoordinator::new(SimulatedBehavior::QueueFull);
        assert_eq!(coordinator.submit_request(request(1)), Err(CoordinatorError::QueueFull));

        coordinator.set_behavior(SimulatedBehavior::Reject(PoolMessage::ErrMode));
        coordinator.submit_request(request(2)).unwrap();
        assert_eq!(
            events.try_recv().unwrap().kind,
            CoordinatorEventKind::Rejected(PoolMessage::ErrMode)
        );

        coordinator.set_behavior(SimulatedBehavior::Silent);
        coordinator.submit_request(request(3)).unwrap();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_bad_signatures_rejected() {
        let (coordinator, mut events) = SimulatedCoordinator::new(SimulatedBehavior::StallAfterAccept);
        coordinator.submit_request(request(4)).unwrap();
        let _ = events.try_recv();

        coordinator
            .submit_signatures(SignatureSubmission {
                session_id: SessionId(4),
                signatures: Vec::new(),
            })
            .unwrap();
        assert_eq!(
            events.try_recv().unwrap().kind,
            CoordinatorEventKind::Rejected(PoolMessage::ErrInvalidInput)
        );
    }
}
