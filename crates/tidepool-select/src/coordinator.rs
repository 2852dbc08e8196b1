//! Selection coordination
//!
//! [`SelectionCoordinator`] is the single entry point for inbound requests
//! and asynchronous events. It owns the table of live per-file machines:
//! concurrent requests for one file merge into one machine, staging and
//! replication completions are routed by file identity, and a pool recovery
//! wakes every machine parked for lack of online replicas.
//!
//! Table mutation happens under one mutex; machine execution, which may
//! block on selector I/O, always runs outside it on a spawned task.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::request::{SelectRequest, SelectRequestInfo, SelectionState};
use crate::selector::{PoolMonitor, SelectError};
use crate::transport::PoolMessenger;
use crate::types::{
    FileAttributes, FileId, RequestIntent, SelectionOutcome, UnavailableReason,
};

struct Shared {
    monitor: Arc<dyn PoolMonitor>,
    messenger: Arc<dyn PoolMessenger>,
    requests: Mutex<HashMap<FileId, Arc<SelectRequest>>>,
    shutdown: AtomicBool,
}

impl Shared {
    /// Move a machine into a parked state. Taken under the table lock so
    /// event routing sees a consistent state for every tabled machine.
    fn park(&self, req: &Arc<SelectRequest>, state: SelectionState) {
        let _table = self.requests.lock();
        req.set_state(state);
    }

    /// Retire a finished machine from the table.
    fn finish(&self, req: &Arc<SelectRequest>) {
        let mut table = self.requests.lock();
        table.remove(&req.id);
        req.set_state(SelectionState::Dispose);
    }

    fn spawn_drive(shared: Arc<Shared>, req: Arc<SelectRequest>) {
        tokio::spawn(Shared::drive(shared, req));
    }

    /// Run the machine until it resolves or parks. Parked states are set
    /// under the table lock before this loop observes them as `next`, so
    /// an event arriving mid-step wakes the machine rather than losing it.
    async fn drive(shared: Arc<Shared>, req: Arc<SelectRequest>) {
        loop {
            let state = req.state();
            debug!(file = %req.id, state = ?state, "selection step");
            let next = match state {
                SelectionState::Init => shared.handle_init(&req).await,
                SelectionState::NoLocations => shared.handle_unavailable(&req, false),
                SelectionState::P2pDenied => shared.handle_unavailable(&req, true),
                SelectionState::ReadDenied | SelectionState::NeedP2p => {
                    shared.handle_replication(&req).await
                }
                SelectionState::NeedStage => shared.handle_stage(&req).await,
                SelectionState::StageComplete | SelectionState::P2pComplete => {
                    info!(file = %req.id, "asynchronous copy arrived, telling callers to resubmit");
                    req.answer_all(SelectionOutcome::OutOfDate);
                    SelectionState::Done
                }
                SelectionState::Waiting
                | SelectionState::NoOnlinePools
                | SelectionState::Lost
                | SelectionState::Failed
                | SelectionState::Done
                | SelectionState::Dispose => return,
            };
            match next {
                SelectionState::Done => {
                    shared.finish(&req);
                    return;
                }
                SelectionState::Waiting
                | SelectionState::NoOnlinePools
                | SelectionState::Lost
                | SelectionState::Failed => return,
                other => req.set_state(other),
            }
        }
    }

    async fn handle_init(&self, req: &Arc<SelectRequest>) -> SelectionState {
        // every fresh attempt starts from current locations
        req.clear_stage_pool();

        if req.intent == RequestIntent::Write {
            return self.handle_write(req).await;
        }

        if req.attrs.locations.is_empty() {
            return SelectionState::NoLocations;
        }

        match req.selector.select_read_pool(&req.attrs).await {
            Ok(pool) => {
                info!(file = %req.id, pool = %pool, "read pool selected");
                req.answer_all(SelectionOutcome::Selected(pool));
                SelectionState::Done
            }
            Err(SelectError::PermissionDenied) => SelectionState::ReadDenied,
            Err(SelectError::NotInCache) => SelectionState::NoLocations,
            Err(SelectError::CostExceeded(msg)) => {
                info!(file = %req.id, "read selection rejected by cost limit");
                req.answer_all(SelectionOutcome::ResourceExceeded(msg));
                self.park(req, SelectionState::Failed);
                SelectionState::Failed
            }
            Err(e) => {
                warn!(file = %req.id, error = %e, "read pool selection failed");
                req.answer_all(SelectionOutcome::Failed(e.to_string()));
                self.park(req, SelectionState::Failed);
                SelectionState::Failed
            }
        }
    }

    /// Writes have no replica to fall back on; every selector failure is
    /// final for the attempt.
    async fn handle_write(&self, req: &Arc<SelectRequest>) -> SelectionState {
        match req
            .selector
            .select_write_pool(&req.attrs, req.attrs.size)
            .await
        {
            Ok(pool) => {
                info!(file = %req.id, pool = %pool, "write pool selected");
                req.answer_all(SelectionOutcome::Selected(pool));
                SelectionState::Done
            }
            Err(SelectError::PermissionDenied) => {
                req.answer_all(SelectionOutcome::PermissionDenied);
                self.park(req, SelectionState::Failed);
                SelectionState::Failed
            }
            Err(SelectError::CostExceeded(msg)) => {
                info!(file = %req.id, "write selection rejected by cost limit");
                req.answer_all(SelectionOutcome::ResourceExceeded(msg));
                self.park(req, SelectionState::Failed);
                SelectionState::Failed
            }
            Err(e) => {
                warn!(file = %req.id, error = %e, "write pool selection failed");
                req.answer_all(SelectionOutcome::Failed(e.to_string()));
                self.park(req, SelectionState::Failed);
                SelectionState::Failed
            }
        }
    }

    /// No usable online replica: stage if the archive has a confirmed
    /// copy, otherwise park until a pool recovers or declare the file lost.
    fn handle_unavailable(&self, req: &Arc<SelectRequest>, after_p2p: bool) -> SelectionState {
        use crate::types::RetentionClass;

        if req.attrs.retention != RetentionClass::Custodial {
            info!(
                file = %req.id,
                "no online replica and no archival fallback, parking until a pool recovers"
            );
            self.park(req, SelectionState::NoOnlinePools);
            SelectionState::NoOnlinePools
        } else if !req.attrs.stored {
            warn!(file = %req.id, "archival copy not confirmed, file is lost");
            req.answer_all(SelectionOutcome::Unavailable(UnavailableReason::Lost));
            self.park(req, SelectionState::Lost);
            SelectionState::Lost
        } else {
            if after_p2p {
                debug!(file = %req.id, "replication denied, falling back to staging");
            }
            SelectionState::NeedStage
        }
    }

    async fn handle_stage(&self, req: &Arc<SelectRequest>) -> SelectionState {
        let previous = req.stage_pool();
        match req
            .selector
            .select_stage_pool(&req.attrs, previous.as_ref())
            .await
        {
            Ok(pool) => {
                req.set_stage_pool(pool.clone());
                // park before sending so a completion racing the send
                // already finds the machine in Waiting
                self.park(req, SelectionState::Waiting);
                match self.messenger.send_stage_request(&pool, &req.attrs).await {
                    Ok(()) => {
                        info!(file = %req.id, pool = %pool, "staging request sent");
                        SelectionState::Waiting
                    }
                    Err(e) => {
                        warn!(file = %req.id, error = %e, "failed to send staging request");
                        req.answer_all(SelectionOutcome::Failed(format!(
                            "staging request failed: {e}"
                        )));
                        self.park(req, SelectionState::Failed);
                        SelectionState::Failed
                    }
                }
            }
            Err(SelectError::CostExceeded(msg)) => {
                req.answer_all(SelectionOutcome::ResourceExceeded(msg));
                self.park(req, SelectionState::Failed);
                SelectionState::Failed
            }
            Err(e) => {
                warn!(file = %req.id, error = %e, "stage pool selection failed");
                req.answer_all(SelectionOutcome::Failed(e.to_string()));
                self.park(req, SelectionState::Failed);
                SelectionState::Failed
            }
        }
    }

    async fn handle_replication(&self, req: &Arc<SelectRequest>) -> SelectionState {
        match req.selector.select_replication_pair(&req.attrs, true).await {
            Ok(pair) => {
                self.park(req, SelectionState::Waiting);
                match self
                    .messenger
                    .send_replication_request(&pair, &req.attrs)
                    .await
                {
                    Ok(()) => {
                        info!(
                            file = %req.id,
                            source = %pair.source,
                            destination = %pair.destination,
                            "replication request sent"
                        );
                        SelectionState::Waiting
                    }
                    Err(e) => {
                        warn!(file = %req.id, error = %e, "failed to send replication request");
                        req.answer_all(SelectionOutcome::Failed(format!(
                            "replication request failed: {e}"
                        )));
                        self.park(req, SelectionState::Failed);
                        SelectionState::Failed
                    }
                }
            }
            Err(SelectError::PermissionDenied) => SelectionState::P2pDenied,
            Err(SelectError::CostExceeded(msg)) => {
                req.answer_all(SelectionOutcome::ResourceExceeded(msg));
                self.park(req, SelectionState::Failed);
                SelectionState::Failed
            }
            Err(e) => {
                warn!(file = %req.id, error = %e, "replication pair selection failed");
                req.answer_all(SelectionOutcome::Failed(e.to_string()));
                self.park(req, SelectionState::Failed);
                SelectionState::Failed
            }
        }
    }
}

/// Entry point for selection requests and the events that resolve them.
pub struct SelectionCoordinator {
    shared: Arc<Shared>,
}

impl SelectionCoordinator {
    /// Create a coordinator drawing selectors from `monitor` and sending
    /// staging and replication requests through `messenger`.
    pub fn new(monitor: Arc<dyn PoolMonitor>, messenger: Arc<dyn PoolMessenger>) -> Self {
        Self {
            shared: Arc::new(Shared {
                monitor,
                messenger,
                requests: Mutex::new(HashMap::new()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Submit a selection request. Concurrent submissions for the same file
    /// merge into the single in-flight machine; every merged caller's
    /// receiver resolves exactly once.
    pub fn submit(
        &self,
        attrs: FileAttributes,
        intent: RequestIntent,
    ) -> Result<oneshot::Receiver<SelectionOutcome>> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        let (tx, rx) = oneshot::channel();
        let id = attrs.id.clone();
        let mut to_spawn = None;
        {
            let mut table = self.shared.requests.lock();
            match table.entry(id.clone()) {
                Entry::Occupied(entry) => match entry.get().add_caller(tx) {
                    Ok(()) => {
                        debug!(file = %id, state = ?entry.get().state(), "merged caller into in-flight selection");
                    }
                    Err((tx, outcome)) => {
                        debug!(file = %id, "answering merged caller from recorded outcome");
                        let _ = tx.send(outcome);
                    }
                },
                Entry::Vacant(slot) => {
                    let selector = self.shared.monitor.pool_selector(&attrs, intent);
                    let request = Arc::new(SelectRequest::new(attrs, intent, selector));
                    if let Err((tx, outcome)) = request.add_caller(tx) {
                        let _ = tx.send(outcome);
                    }
                    slot.insert(Arc::clone(&request));
                    to_spawn = Some(request);
                }
            }
        }

        if let Some(request) = to_spawn {
            debug!(file = %request.id, intent = ?request.intent, "new selection request");
            Shared::spawn_drive(Arc::clone(&self.shared), request);
        }
        Ok(rx)
    }

    /// A pool came back up: reset every machine parked for lack of online
    /// replicas and rerun it. One recovery can unblock many files.
    pub fn pool_up(&self, pool: &str) {
        let woken: Vec<Arc<SelectRequest>> = {
            let table = self.shared.requests.lock();
            table
                .values()
                .filter(|r| r.set_state_if(SelectionState::NoOnlinePools, SelectionState::Init))
                .cloned()
                .collect()
        };
        if !woken.is_empty() {
            info!(pool, count = woken.len(), "pool recovery woke parked selections");
        }
        for req in woken {
            Shared::spawn_drive(Arc::clone(&self.shared), req);
        }
    }

    /// A staging request finished. On success the machine answers its
    /// callers with a resubmit instruction; on failure it picks another
    /// stage pool and tries again.
    pub fn stage_completed(&self, id: &FileId, success: bool) {
        self.completion(
            id,
            success,
            SelectionState::StageComplete,
            SelectionState::NeedStage,
            "stage",
        );
    }

    /// A replication request finished; same contract as staging.
    pub fn replication_completed(&self, id: &FileId, success: bool) {
        self.completion(
            id,
            success,
            SelectionState::P2pComplete,
            SelectionState::NeedP2p,
            "replication",
        );
    }

    fn completion(
        &self,
        id: &FileId,
        success: bool,
        done_state: SelectionState,
        retry_state: SelectionState,
        kind: &str,
    ) {
        let req = {
            let table = self.shared.requests.lock();
            let Some(req) = table.get(id) else {
                debug!(file = %id, kind, "ignoring completion for unknown request");
                return;
            };
            let target = if success { done_state } else { retry_state };
            if !req.set_state_if(SelectionState::Waiting, target) {
                debug!(file = %id, kind, state = ?req.state(), "ignoring completion for non-waiting request");
                return;
            }
            Arc::clone(req)
        };
        debug!(file = %id, kind, success, "completion event");
        Shared::spawn_drive(Arc::clone(&self.shared), req);
    }

    /// Stop accepting requests and answer everything still pending. Parked
    /// requests that already resolved keep their recorded outcome; the rest
    /// get an unavailable or shutdown answer.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<Arc<SelectRequest>> = {
            let mut table = self.shared.requests.lock();
            table.drain().map(|(_, req)| req).collect()
        };
        info!(count = drained.len(), "draining selection requests for shutdown");
        for req in drained {
            let outcome = match req.state() {
                SelectionState::NoOnlinePools => {
                    SelectionOutcome::Unavailable(UnavailableReason::NoOnlinePools)
                }
                _ => SelectionOutcome::Failed("selection coordinator is shutting down".into()),
            };
            req.answer_all_if_pending(outcome);
            req.set_state(SelectionState::Dispose);
        }
    }

    /// Number of live selection machines.
    pub fn request_count(&self) -> usize {
        self.shared.requests.lock().len()
    }

    /// Introspection record for one file, if a machine is live for it.
    pub fn request_info(&self, id: &FileId) -> Option<SelectRequestInfo> {
        self.shared.requests.lock().get(id).map(|r| r.info())
    }

    /// Introspection records for every live machine.
    pub fn request_infos(&self) -> Vec<SelectRequestInfo> {
        self.shared
            .requests
            .lock()
            .values()
            .map(|r| r.info())
            .collect()
    }
}

static_assertions::assert_impl_all!(SelectionCoordinator: Send, Sync);
