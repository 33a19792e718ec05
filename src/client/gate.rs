use super::ClientError;
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

/// Outcome of one refresh: the new access token, or why there is none.
pub type RefreshOutcome = Result<String, ClientError>;

struct GateState {
    refreshing: bool,
    pending: Vec<oneshot::Sender<RefreshOutcome>>,
    /// Bumped every time a refresh settles.
    generation: u64,
    last_failure: Option<ClientError>,
}

/// What a request that just saw a 401 should do next.
pub enum Admission<'a> {
    /// A refresh settled successfully after the request was sent. Replay with
    /// the stored token.
    Renewed,
    /// A refresh settled with this failure after the request was sent.
    Failed(ClientError),
    /// Another request is refreshing. Wait for its outcome.
    Queued(oneshot::Receiver<RefreshOutcome>),
    /// The caller must run the refresh and settle the lease.
    Leader(RefreshLease<'a>),
}

/// Per-session single-flight coordinator for token refresh.
///
/// The lock is only held inside `admit` and `settle`, never across an await.
pub struct RefreshGate {
    state: Mutex<GateState>,
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                refreshing: false,
                pending: Vec::new(),
                generation: 0,
                last_failure: None,
            }),
        }
    }

    /// Snapshot to take before sending a request, then pass to `admit`.
    pub fn generation(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    pub fn is_refreshing(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .refreshing
    }

    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }

    pub fn admit(&self, seen_generation: u64) -> Admission<'_> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.generation != seen_generation {
            return match &state.last_failure {
                Some(e) => Admission::Failed(e.clone()),
                None => Admission::Renewed,
            };
        }

        if state.refreshing {
            let (tx, rx) = oneshot::channel();
            state.pending.push(tx);
            return Admission::Queued(rx);
        }

        state.refreshing = true;
        Admission::Leader(RefreshLease {
            gate: self,
            settled: false,
        })
    }

    fn settle(&self, outcome: RefreshOutcome) {
        let pending = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.refreshing = false;
            state.generation += 1;
            state.last_failure = outcome.as_ref().err().cloned();
            std::mem::take(&mut state.pending)
        };

        for waiter in pending {
            // A waiter whose request was dropped has nobody to tell.
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Proof of refresh leadership. Dropping it unsettled releases every queued
/// request with `RefreshAborted`.
pub struct RefreshLease<'a> {
    gate: &'a RefreshGate,
    settled: bool,
}

impl RefreshLease<'_> {
    pub fn settle(mut self, outcome: RefreshOutcome) {
        self.settled = true;
        self.gate.settle(outcome);
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.gate.settle(Err(ClientError::RefreshAborted));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leader(gate: &RefreshGate) -> RefreshLease<'_> {
        match gate.admit(gate.generation()) {
            Admission::Leader(lease) => lease,
            _ => panic!("expected leadership"),
        }
    }

    fn queued(gate: &RefreshGate, seen: u64) -> oneshot::Receiver<RefreshOutcome> {
        match gate.admit(seen) {
            Admission::Queued(rx) => rx,
            _ => panic!("expected to be queued"),
        }
    }

    #[tokio::test]
    async fn followers_share_the_leaders_outcome() {
        let gate = RefreshGate::new();
        let seen = gate.generation();
        let lease = leader(&gate);
        let a = queued(&gate, seen);
        let b = queued(&gate, seen);
        assert!(gate.is_refreshing());
        assert_eq!(gate.pending(), 2);

        lease.settle(Ok("new".to_string()));

        assert_eq!(a.await.unwrap(), Ok("new".to_string()));
        assert_eq!(b.await.unwrap(), Ok("new".to_string()));
        assert!(!gate.is_refreshing());
        assert_eq!(gate.pending(), 0);
        assert_eq!(gate.generation(), seen + 1);
    }

    #[tokio::test]
    async fn failure_fans_out() {
        let gate = RefreshGate::new();
        let seen = gate.generation();
        let lease = leader(&gate);
        let a = queued(&gate, seen);

        lease.settle(Err(ClientError::RefreshRejected("nope".to_string())));

        assert_eq!(
            a.await.unwrap(),
            Err(ClientError::RefreshRejected("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn dropped_lease_aborts_followers() {
        let gate = RefreshGate::new();
        let seen = gate.generation();
        let lease = leader(&gate);
        let a = queued(&gate, seen);

        drop(lease);

        assert_eq!(a.await.unwrap(), Err(ClientError::RefreshAborted));
        assert!(!gate.is_refreshing());
    }

    #[test]
    fn stale_generation_skips_a_second_refresh() {
        let gate = RefreshGate::new();
        let seen = gate.generation();
        leader(&gate).settle(Ok("new".to_string()));

        assert!(matches!(gate.admit(seen), Admission::Renewed));
        assert!(!gate.is_refreshing());

        leader(&gate).settle(Err(ClientError::RefreshExhausted));
        assert!(matches!(
            gate.admit(seen + 1),
            Admission::Failed(ClientError::RefreshExhausted)
        ));
    }

    #[test]
    fn next_refresh_can_start_after_settling() {
        let gate = RefreshGate::new();
        leader(&gate).settle(Ok("one".to_string()));
        let _second = leader(&gate);
        assert!(gate.is_refreshing());
    }
}
