//! Mixing Session Manager
//!
//! Owns every in-flight session in a registry keyed by session id. At most
//! one session per denomination is active at a time, sessions of different
//! denominations run independently. Coordinator events for a session are
//! applied in arrival order under the registry lock. Input locks are taken
//! on submission and released exactly once, when the session is removed
//! from the registry.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::consensus_params::obfuscation::POOL_MAX_TRANSACTIONS;
use crate::denomination::Denomination;

use super::{
    CollateralCandidate, CollateralValidator, CoordinatorError, CoordinatorEvent, CoordinatorEventKind,
    InputCommitment, InputLockRegistry, InputSigner, LockError, MasternodeCoordinator, ObfuscationSession,
    OutPoint, PoolMessage, SessionId, SessionRequest, SessionState, SignatureSubmission,
};

/// Finished sessions remembered for status queries
const FINISHED_HISTORY: usize = 256;

/// Period of the deadline sweep in the event loop
const DEADLINE_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Session error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid collateral: {0}")]
    InvalidCollateral(String),

    #[error("Input locked: {0}")]
    InputLocked(#[from] LockError),

    #[error("Input {outpoint:?} does not match denomination {denomination}")]
    IncompatibleDenomination { outpoint: OutPoint, denomination: Denomination },

    #[error("No inputs to mix")]
    NoInputs,

    #[error("Mixing is disabled")]
    MixingDisabled,

    #[error("A session for denomination {0} is already running")]
    DenominationBusy(Denomination),

    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    #[error("Event not expected by {session} in state {state}")]
    UnexpectedEvent { session: SessionId, state: SessionState },

    #[error("Rejected by coordinator: {}", .0.text())]
    Rejected(PoolMessage),

    #[error("Session {0} timed out")]
    Timeout(SessionId),

    #[error("Masternode unreachable: {0}")]
    CoordinatorUnreachable(String),

    #[error("Masternode queue is full")]
    QueueFull,

    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

impl From<CoordinatorError> for SessionError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Unreachable(reason) => SessionError::CoordinatorUnreachable(reason),
            CoordinatorError::QueueFull => SessionError::QueueFull,
            CoordinatorError::Rejected(message) => SessionError::Rejected(message),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Final record of a session after it left the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    pub denomination: Denomination,
    pub state: SessionState,
    pub round: u32,
    pub txid: Option<[u8; 32]>,
    pub message: Option<PoolMessage>,
    pub reason: Option<String>,
}

struct SessionEntry {
    session: ObfuscationSession,
    own_inputs: usize,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, SessionEntry>,
    active_by_denomination: HashMap<Denomination, SessionId>,
}

pub struct MixingSessionManager {
    coordinator: Arc<dyn MasternodeCoordinator>,
    signer: Arc<dyn InputSigner>,
    locks: Arc<InputLockRegistry>,
    collateral: CollateralValidator,
    enabled: AtomicBool,
    next_id: AtomicU64,
    registry: Mutex<Registry>,
    finished: Mutex<LruCache<SessionId, SessionOutcome>>,
}

impl MixingSessionManager {
    pub fn new(
        coordinator: Arc<dyn MasternodeCoordinator>,
        signer: Arc<dyn InputSigner>,
        locks: Arc<InputLockRegistry>,
        enabled: bool,
    ) -> Self {
        Self {
            coordinator,
            signer,
            locks,
            collateral: CollateralValidator::new(),
            enabled: AtomicBool::new(enabled),
            next_id: AtomicU64::new(1),
            registry: Mutex::new(Registry::default()),
            finished: Mutex::new(LruCache::new(
                NonZeroUsize::new(FINISHED_HISTORY).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn locks(&self) -> &Arc<InputLockRegistry> {
        &self.locks
    }

    /// Reserve the inputs and queue them with the coordinator
    pub fn submit(
        &self,
        denomination: Denomination,
        inputs: Vec<InputCommitment>,
        collateral: CollateralCandidate,
        now: Instant,
    ) -> SessionResult<SessionId> {
        if !self.is_enabled() {
            return Err(SessionError::MixingDisabled);
        }
        if inputs.is_empty() {
            return Err(SessionError::NoInputs);
        }
        if let Some(bad) = inputs.iter().find(|i| i.value != denomination.amount()) {
            return Err(SessionError::IncompatibleDenomination {
                outpoint: bad.outpoint,
                denomination,
            });
        }
        let verdict = self.collateral.validate(&collateral, &self.locks);
        if !verdict.valid {
            return Err(SessionError::InvalidCollateral(verdict.reason.unwrap_or_default()));
        }

        let mut registry = self.registry.lock();
        if registry.active_by_denomination.contains_key(&denomination) {
            return Err(SessionError::DenominationBusy(denomination));
        }

        let session_id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut session = ObfuscationSession::new(session_id, denomination, inputs.clone(), collateral.outpoint);
        let own_inputs = inputs.len();
        self.locks.reserve(session_id, &session.reserved_inputs(own_inputs))?;

        session.transition(SessionState::Queued, now);
        let request = SessionRequest {
            session_id,
            denomination,
            inputs,
            collateral,
        };
        if let Err(err) = self.coordinator.submit_request(request) {
            self.locks.release_session(session_id);
            log::warn!("{} could not be queued: {}", session_id, err);
            return Err(err.into());
        }

        log::info!("{} queued for denomination {} with {} inputs", session_id, denomination, own_inputs);
        registry.active_by_denomination.insert(denomination, session_id);
        registry.sessions.insert(session_id, SessionEntry { session, own_inputs });
        Ok(session_id)
    }

    /// Apply one coordinator event and return the session's resulting state
    pub fn handle_event(&self, event: CoordinatorEvent, now: Instant) -> SessionResult<SessionState> {
        let mut registry = self.registry.lock();
        let entry = match registry.sessions.get_mut(&event.session_id) {
            Some(entry) => entry,
            None => {
                log::debug!("ignoring event for unknown {}", event.session_id);
                return Err(SessionError::UnknownSession(event.session_id));
            }
        };
        let session_id = event.session_id;
        let state = entry.session.state;

        let next = match event.kind {
            CoordinatorEventKind::Accepted { participants } if state == SessionState::Queued => {
                let own: Vec<InputCommitment> = entry.session.participants[..entry.own_inputs].to_vec();
                let mut ordered = own.clone();
                ordered.extend(participants.into_iter().filter(|p| !own.contains(p)));
                if ordered.len() < POOL_MAX_TRANSACTIONS {
                    Err((
                        format!(
                            "accepted with {} of {} required inputs",
                            ordered.len(),
                            POOL_MAX_TRANSACTIONS
                        ),
                        None,
                    ))
                } else {
                    entry.session.participants = ordered;
                    entry.session.transition(SessionState::Accepted, now);
                    Ok(SessionState::Accepted)
                }
            }
            CoordinatorEventKind::FinalTransaction { tx_hash } if state == SessionState::Accepted => {
                match self.sign_and_submit(&entry.session, entry.own_inputs, &tx_hash) {
                    Ok(()) => {
                        entry.session.transition(SessionState::Signing, now);
                        Ok(SessionState::Signing)
                    }
                    Err(err) => Err((err.to_string(), None)),
                }
            }
            CoordinatorEventKind::Complete { txid } if state == SessionState::Signing => {
                entry.session.transition(SessionState::Complete, now);
                let outcome = self.finish(&mut registry, session_id, None, None, Some(txid));
                log::info!(
                    "{} complete in round {}, joint tx {}",
                    session_id,
                    outcome.map_or(0, |o| o.round),
                    hex::encode(&txid[..8])
                );
                return Ok(SessionState::Complete);
            }
            CoordinatorEventKind::Rejected(message) => Err((message.text().to_string(), Some(message))),
            _ => {
                log::warn!("{} received an unexpected event in state {}", session_id, state);
                return Err(SessionError::UnexpectedEvent { session: session_id, state });
            }
        };

        match next {
            Ok(state) => Ok(state),
            Err((reason, message)) => {
                if let Some(entry) = registry.sessions.get_mut(&session_id) {
                    entry.session.transition(SessionState::Failed, now);
                }
                log::warn!("{} failed: {}", session_id, reason);
                self.finish(&mut registry, session_id, message, Some(reason), None);
                Ok(SessionState::Failed)
            }
        }
    }

    /// Time out every session whose deadline has passed
    pub fn check_timeouts(&self, now: Instant) -> Vec<SessionId> {
        let mut registry = self.registry.lock();
        let mut expired: Vec<SessionId> = registry
            .sessions
            .values()
            .filter(|e| e.session.is_expired(now))
            .map(|e| e.session.session_id)
            .collect();
        expired.sort();

        for session_id in &expired {
            if let Some(entry) = registry.sessions.get_mut(session_id) {
                let previous = entry.session.state;
                entry.session.transition(SessionState::TimedOut, now);
                log::warn!("{} timed out while {}", session_id, previous);
            }
            self.finish(
                &mut registry,
                *session_id,
                None,
                Some(SessionError::Timeout(*session_id).to_string()),
                None,
            );
        }
        expired
    }

    /// Abort a session, releasing its inputs
    pub fn cancel(&self, session_id: SessionId, now: Instant) -> SessionResult<()> {
        let mut registry = self.registry.lock();
        let entry = registry
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;
        entry.session.transition(SessionState::Failed, now);
        self.finish(&mut registry, session_id, None, Some("cancelled".to_string()), None);
        log::info!("{} cancelled", session_id);
        Ok(())
    }

    /// Cancel every active session; returns how many were cancelled
    pub fn shutdown(&self) -> usize {
        let now = Instant::now();
        let ids = self.active_sessions();
        let cancelled = ids.iter().filter(|id| self.cancel(**id, now).is_ok()).count();
        if cancelled > 0 {
            log::info!("mixing shutdown cancelled {} sessions", cancelled);
        }
        cancelled
    }

    pub fn active_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.registry.lock().sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn session(&self, session_id: SessionId) -> Option<ObfuscationSession> {
        self.registry
            .lock()
            .sessions
            .get(&session_id)
            .map(|e| e.session.clone())
    }

    pub fn status(&self, session_id: SessionId) -> Option<SessionState> {
        if let Some(entry) = self.registry.lock().sessions.get(&session_id) {
            return Some(entry.session.state);
        }
        self.finished.lock().get(&session_id).map(|o| o.state)
    }

    /// Status text for display
    pub fn status_text(&self, session_id: SessionId) -> String {
        match self.status(session_id) {
            Some(state) => state.status_text().to_string(),
            None => "unknown".to_string(),
        }
    }

    pub fn outcome(&self, session_id: SessionId) -> Option<SessionOutcome> {
        self.finished.lock().get(&session_id).cloned()
    }

    /// Drain coordinator events and sweep deadlines until shutdown
    pub async fn run_event_loop(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<CoordinatorEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut sweep = tokio::time::interval(DEADLINE_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event, Instant::now()) {
                            log::debug!("coordinator event not applied: {}", e);
                        }
                    }
                    None => {
                        log::info!("coordinator channel closed, stopping mixing event loop");
                        break;
                    }
                },
                _ = sweep.tick() => {
                    self.check_timeouts(Instant::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown();
    }

    fn sign_and_submit(&self, session: &ObfuscationSession, own_inputs: usize, tx_hash: &[u8; 32]) -> SessionResult<()> {
        let signatures = session.participants[..own_inputs]
            .iter()
            .map(|input| self.signer.sign_input(session.session_id, input, tx_hash))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SessionError::SigningFailed(e.to_string()))?;

        self.coordinator.submit_signatures(SignatureSubmission {
            session_id: session.session_id,
            signatures,
        })?;
        Ok(())
    }

    /// Remove a terminal session and release its locks
    fn finish(
        &self,
        registry: &mut Registry,
        session_id: SessionId,
        message: Option<PoolMessage>,
        reason: Option<String>,
        txid: Option<[u8; 32]>,
    ) -> Option<SessionOutcome> {
        let entry = registry.sessions.remove(&session_id)?;
        let denomination = entry.session.denomination;
        if registry.active_by_denomination.get(&denomination) == Some(&session_id) {
            registry.active_by_denomination.remove(&denomination);
        }
        let released = self.locks.release_session(session_id);
        log::debug!("{} finished as {}, {} inputs released", session_id, entry.session.state, released);

        let outcome = SessionOutcome {
            session_id,
            denomination,
            state: entry.session.state,
            round: entry.session.round,
            txid,
            message,
            reason,
        };
        self.finished.lock().put(session_id, outcome.clone());
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus_params::obfuscation::COLLATERAL;
    use crate::obfuscation::{Secp256k1InputSigner, SimulatedBehavior, SimulatedCoordinator};

    struct Harness {
        manager: Arc<MixingSessionManager>,
        coordinator: Arc<SimulatedCoordinator>,
        events: mpsc::UnboundedReceiver<CoordinatorEvent>,
    }

    fn harness(behavior: SimulatedBehavior) -> Harness {
        let (coordinator, events) = SimulatedCoordinator::new(behavior);
        let coordinator = Arc::new(coordinator);
        let manager = MixingSessionManager::new(
            coordinator.clone(),
            Arc::new(Secp256k1InputSigner::new(&[5u8; 32]).unwrap()),
            Arc::new(InputLockRegistry::new()),
            true,
        );
        Harness {
            manager: Arc::new(manager),
            coordinator,
            events,
        }
    }

    fn inputs(denomination: Denomination, seed: u8, count: u8) -> Vec<InputCommitment> {
        (0..count)
            .map(|i| InputCommitment {
                outpoint: OutPoint::new([seed; 32], i as u32),
                value: denomination.amount(),
            })
            .collect()
    }

    fn collateral(seed: u8) -> CollateralCandidate {
        CollateralCandidate {
            outpoint: OutPoint::new([seed; 32], 99),
            value: COLLATERAL,
        }
    }

    fn step(h: &mut Harness, now: Instant) -> Option<SessionResult<SessionState>> {
        h.events.try_recv().ok().map(|event| h.manager.handle_event(event, now))
    }

    fn drain(h: &mut Harness, now: Instant) -> Vec<SessionResult<SessionState>> {
        let mut results = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            results.push(h.manager.handle_event(event, now));
        }
        results
    }

    #[test]
    fn test_full_round_completes_and_releases() {
        let mut h = harness(SimulatedBehavior::Cooperative);
        let now = Instant::now();
        let id = h
            .manager
            .submit(Denomination::Ten, inputs(Denomination::Ten, 1, 2), collateral(1), now)
            .unwrap();
        assert_eq!(h.manager.status_text(id), "queued");
        assert_eq!(h.manager.locks().len(), 3);

        // Accepted, FinalTransaction, then Complete once our signatures arrive
        let results = drain(&mut h, now);
        assert_eq!(
            results,
            vec![Ok(SessionState::Accepted), Ok(SessionState::Signing), Ok(SessionState::Complete)]
        );

        assert_eq!(h.manager.status(id), Some(SessionState::Complete));
        assert!(h.manager.locks().is_empty());
        let outcome = h.manager.outcome(id).unwrap();
        assert!(outcome.txid.is_some());
        assert_eq!(outcome.round, 4);
    }

    #[test]
    fn test_timeout_fires_once_and_releases_locks() {
        let mut h = harness(SimulatedBehavior::Silent);
        let now = Instant::now();
        let id = h
            .manager
            .submit(Denomination::Fifty, inputs(Denomination::Fifty, 2, 1), collateral(2), now)
            .unwrap();
        assert!(drain(&mut h, now).is_empty());

        assert!(h.manager.check_timeouts(now + Duration::from_secs(29)).is_empty());
        assert_eq!(h.manager.check_timeouts(now + Duration::from_secs(30)), vec![id]);
        assert!(h.manager.check_timeouts(now + Duration::from_secs(60)).is_empty());

        assert_eq!(h.manager.status_text(id), "timed out");
        assert!(h.manager.locks().is_empty());
    }

    #[test]
    fn test_signing_deadline_is_shorter() {
        let mut h = harness(SimulatedBehavior::Cooperative);
        let now = Instant::now();
        let id = h
            .manager
            .submit(Denomination::One, inputs(Denomination::One, 3, 1), collateral(3), now)
            .unwrap();
        let signing_at = now + Duration::from_secs(10);
        assert_eq!(step(&mut h, signing_at), Some(Ok(SessionState::Accepted)));
        assert_eq!(step(&mut h, signing_at), Some(Ok(SessionState::Signing)));

        assert_eq!(h.manager.check_timeouts(signing_at + Duration::from_secs(15)), vec![id]);
        // Late completion for a finished session is ignored
        assert_eq!(drain(&mut h, signing_at), vec![Err(SessionError::UnknownSession(id))]);
        assert_eq!(h.manager.status(id), Some(SessionState::TimedOut));
    }

    #[test]
    fn test_rejection_fails_session() {
        let mut h = harness(SimulatedBehavior::Reject(PoolMessage::ErrAlreadyHave));
        let now = Instant::now();
        let id = h
            .manager
            .submit(Denomination::Five, inputs(Denomination::Five, 4, 1), collateral(4), now)
            .unwrap();
        assert_eq!(drain(&mut h, now), vec![Ok(SessionState::Failed)]);

        let outcome = h.manager.outcome(id).unwrap();
        assert_eq!(outcome.message, Some(PoolMessage::ErrAlreadyHave));
        assert_eq!(outcome.reason.as_deref(), Some("Already have that input."));
        assert!(h.manager.locks().is_empty());
    }

    #[test]
    fn test_underfilled_acceptance_fails_session() {
        let mut h = harness(SimulatedBehavior::Silent);
        let now = Instant::now();
        let id = h
            .manager
            .submit(Denomination::Fifty, inputs(Denomination::Fifty, 4, 1), collateral(4), now)
            .unwrap();

        // Our own input echoed back plus one peer: short of a full pool
        let mut participants = inputs(Denomination::Fifty, 4, 1);
        participants.extend(inputs(Denomination::Fifty, 5, 1));
        h.coordinator.emit(id, CoordinatorEventKind::Accepted { participants });
        assert_eq!(step(&mut h, now), Some(Ok(SessionState::Failed)));

        let outcome = h.manager.outcome(id).unwrap();
        assert_eq!(outcome.state, SessionState::Failed);
        assert_eq!(outcome.reason.as_deref(), Some("accepted with 2 of 3 required inputs"));
        assert!(h.manager.locks().is_empty());
        assert!(h.manager.active_sessions().is_empty());
    }

    #[test]
    fn test_submission_rejections() {
        let h = harness(SimulatedBehavior::Silent);
        let now = Instant::now();

        assert_eq!(
            h.manager.submit(Denomination::Ten, Vec::new(), collateral(1), now),
            Err(SessionError::NoInputs)
        );
        assert!(matches!(
            h.manager.submit(Denomination::Ten, inputs(Denomination::Five, 1, 1), collateral(1), now),
            Err(SessionError::IncompatibleDenomination { .. })
        ));
        let mut small = collateral(1);
        small.value = COLLATERAL - 1;
        assert!(matches!(
            h.manager.submit(Denomination::Ten, inputs(Denomination::Ten, 1, 1), small, now),
            Err(SessionError::InvalidCollateral(_))
        ));

        h.manager.submit(Denomination::Ten, inputs(Denomination::Ten, 1, 1), collateral(1), now).unwrap();
        assert_eq!(
            h.manager.submit(Denomination::Ten, inputs(Denomination::Ten, 2, 1), collateral(2), now),
            Err(SessionError::DenominationBusy(Denomination::Ten))
        );
        // Same UTXO under another denomination's session
        let mut reused = inputs(Denomination::Five, 1, 1);
        reused[0].outpoint = OutPoint::new([1u8; 32], 0);
        assert!(matches!(
            h.manager.submit(Denomination::Five, reused, collateral(3), now),
            Err(SessionError::InputLocked(_))
        ));
        assert_eq!(h.manager.locks().len(), 2);

        h.manager.set_enabled(false);
        assert_eq!(
            h.manager.submit(Denomination::One, inputs(Denomination::One, 9, 1), collateral(9), now),
            Err(SessionError::MixingDisabled)
        );
    }

    #[test]
    fn test_coordinator_failures_release_locks() {
        let h = harness(SimulatedBehavior::QueueFull);
        let now = Instant::now();
        assert_eq!(
            h.manager.submit(Denomination::Ten, inputs(Denomination::Ten, 1, 1), collateral(1), now),
            Err(SessionError::QueueFull)
        );
        h.coordinator.set_behavior(SimulatedBehavior::Unreachable);
        assert!(matches!(
            h.manager.submit(Denomination::Ten, inputs(Denomination::Ten, 1, 1), collateral(1), now),
            Err(SessionError::CoordinatorUnreachable(_))
        ));
        assert!(h.manager.locks().is_empty());
        assert!(h.manager.active_sessions().is_empty());
    }

    #[test]
    fn test_unexpected_event_keeps_session() {
        let h = harness(SimulatedBehavior::Silent);
        let now = Instant::now();
        let id = h
            .manager
            .submit(Denomination::Ten, inputs(Denomination::Ten, 1, 1), collateral(1), now)
            .unwrap();
        let result = h.manager.handle_event(
            CoordinatorEvent {
                session_id: id,
                kind: CoordinatorEventKind::Complete { txid: [0u8; 32] },
            },
            now,
        );
        assert_eq!(
            result,
            Err(SessionError::UnexpectedEvent {
                session: id,
                state: SessionState::Queued
            })
        );
        assert_eq!(h.manager.status(id), Some(SessionState::Queued));
    }

    #[test]
    fn test_concurrent_denominations_and_shutdown() {
        let h = harness(SimulatedBehavior::Silent);
        let now = Instant::now();
        h.manager.submit(Denomination::Ten, inputs(Denomination::Ten, 1, 1), collateral(1), now).unwrap();
        h.manager.submit(Denomination::Fifty, inputs(Denomination::Fifty, 2, 1), collateral(2), now).unwrap();
        assert_eq!(h.manager.active_sessions().len(), 2);

        assert_eq!(h.manager.shutdown(), 2);
        assert!(h.manager.active_sessions().is_empty());
        assert!(h.manager.locks().is_empty());
    }

    #[tokio::test]
    async fn test_event_loop_drives_round() {
        let (coordinator, events) = SimulatedCoordinator::new(SimulatedBehavior::Cooperative);
        let manager = Arc::new(MixingSessionManager::new(
            Arc::new(coordinator),
            Arc::new(Secp256k1InputSigner::new(&[6u8; 32]).unwrap()),
            Arc::new(InputLockRegistry::new()),
            true,
        ));
        let (stop, stop_rx) = watch::channel(false);
        let worker = tokio::spawn(Arc::clone(&manager).run_event_loop(events, stop_rx));

        let id = manager
            .submit(Denomination::Ten, inputs(Denomination::Ten, 7, 1), collateral(7), Instant::now())
            .unwrap();
        for _ in 0..100 {
            if manager.status(id) == Some(SessionState::Complete) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.status(id), Some(SessionState::Complete));

        stop.send(true).unwrap();
        worker.await.unwrap();
    }
}
