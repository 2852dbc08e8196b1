//! Per-file selection request state
//!
//! One [`SelectRequest`] exists per in-flight file identity. It carries the
//! state machine's current state plus the reply channels of every caller
//! merged into it. The transition logic lives in the coordinator; this
//! module owns the bookkeeping invariant that each caller is answered
//! exactly once, including callers that merge in after the outcome is
//! already known.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::selector::PoolSelector;
use crate::types::{FileAttributes, FileId, RequestIntent, SelectedPool, SelectionOutcome};

/// States of the per-file selection machine.
///
/// `Waiting`, `NoOnlinePools`, `Lost` and `Failed` are parked states: the
/// machine sits in the coordinator's table and only an external event moves
/// it again. `Dispose` marks a retired machine; stale events aimed at it
/// are absorbed without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionState {
    /// Fresh attempt; resolve against current locations.
    Init,
    /// No known online replica.
    NoLocations,
    /// Read selection was denied; try replication.
    ReadDenied,
    /// A staging request must be issued.
    NeedStage,
    /// Replication was denied; fall back to stage-or-lost.
    P2pDenied,
    /// A replication request must be issued.
    NeedP2p,
    /// A staging or replication request is outstanding.
    Waiting,
    /// Staging finished; callers must resubmit with fresh locations.
    StageComplete,
    /// Replication finished; callers must resubmit with fresh locations.
    P2pComplete,
    /// Every pool holding the file is down; woken by pool recovery.
    NoOnlinePools,
    /// No replica and no archival copy; permanent.
    Lost,
    /// The attempt failed; callers were answered.
    Failed,
    /// All callers answered.
    Done,
    /// Retired from the table.
    Dispose,
}

/// One merged selection request for a single file.
pub(crate) struct SelectRequest {
    pub(crate) id: FileId,
    pub(crate) attrs: FileAttributes,
    pub(crate) intent: RequestIntent,
    pub(crate) selector: Arc<dyn PoolSelector>,
    created: DateTime<Utc>,
    state: Mutex<SelectionState>,
    callers: Mutex<Vec<oneshot::Sender<SelectionOutcome>>>,
    outcome: Mutex<Option<SelectionOutcome>>,
    stage_pool: Mutex<Option<SelectedPool>>,
}

impl SelectRequest {
    pub(crate) fn new(
        attrs: FileAttributes,
        intent: RequestIntent,
        selector: Arc<dyn PoolSelector>,
    ) -> Self {
        Self {
            id: attrs.id.clone(),
            attrs,
            intent,
            selector,
            created: Utc::now(),
            state: Mutex::new(SelectionState::Init),
            callers: Mutex::new(Vec::new()),
            outcome: Mutex::new(None),
            stage_pool: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> SelectionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: SelectionState) {
        *self.state.lock() = state;
    }

    /// Swap `from` for `to` if the machine is currently in `from`.
    pub(crate) fn set_state_if(&self, from: SelectionState, to: SelectionState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Merge one more caller in. Returns the recorded outcome instead when
    /// the request has already resolved, so the caller can be answered
    /// directly rather than stranded.
    pub(crate) fn add_caller(
        &self,
        tx: oneshot::Sender<SelectionOutcome>,
    ) -> std::result::Result<(), (oneshot::Sender<SelectionOutcome>, SelectionOutcome)> {
        let outcome = self.outcome.lock();
        if let Some(resolved) = outcome.as_ref() {
            return Err((tx, resolved.clone()));
        }
        self.callers.lock().push(tx);
        Ok(())
    }

    /// Record the outcome and answer every merged caller. Later transitions
    /// through `answer_all` overwrite the recorded outcome; the drained
    /// caller list guarantees nobody is answered twice.
    pub(crate) fn answer_all(&self, outcome: SelectionOutcome) {
        // outcome lock held across the drain so a merging caller either
        // lands in the drained list or sees the recorded outcome
        let mut recorded = self.outcome.lock();
        *recorded = Some(outcome.clone());
        let drained: Vec<_> = self.callers.lock().drain(..).collect();
        drop(recorded);

        for tx in drained {
            let _ = tx.send(outcome.clone());
        }
    }

    /// Answer pending callers only if no outcome was recorded yet. Used by
    /// shutdown so already-resolved parked requests keep their outcome.
    pub(crate) fn answer_all_if_pending(&self, outcome: SelectionOutcome) {
        let mut recorded = self.outcome.lock();
        if recorded.is_none() {
            *recorded = Some(outcome.clone());
        }
        let answer = recorded.clone().unwrap_or(outcome);
        let drained: Vec<_> = self.callers.lock().drain(..).collect();
        drop(recorded);

        for tx in drained {
            let _ = tx.send(answer.clone());
        }
    }

    pub(crate) fn pending_callers(&self) -> usize {
        self.callers.lock().len()
    }

    pub(crate) fn stage_pool(&self) -> Option<SelectedPool> {
        self.stage_pool.lock().clone()
    }

    pub(crate) fn set_stage_pool(&self, pool: SelectedPool) {
        *self.stage_pool.lock() = Some(pool);
    }

    pub(crate) fn clear_stage_pool(&self) {
        *self.stage_pool.lock() = None;
    }

    pub(crate) fn info(&self) -> SelectRequestInfo {
        SelectRequestInfo {
            id: self.id.clone(),
            state: self.state(),
            intent: self.intent,
            pending_callers: self.pending_callers(),
            created: self.created,
        }
    }
}

/// Introspection record for one in-flight selection request.
#[derive(Debug, Clone, Serialize)]
pub struct SelectRequestInfo {
    /// File identity.
    pub id: FileId,
    /// Current machine state.
    pub state: SelectionState,
    /// Caller intent.
    pub intent: RequestIntent,
    /// Number of merged callers still awaiting an answer.
    pub pending_callers: usize,
    /// When the first caller arrived.
    pub created: DateTime<Utc>,
}
