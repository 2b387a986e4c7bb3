//! Offline sync coordinator.
//!
//! `CaixaClient` is the device-side facade. Every mutating command follows
//! the same path: capability pre-check and local validation (no side effects
//! on failure), optimistic apply to the snapshot cache, then write-through
//! to the remote store, or a durable enqueue when the transport is down.
//! The caller never blocks on the network and a network failure never fails
//! a command; it only degrades the connectivity indicator.
//!
//! `refresh()` is the one reconciliation path. A change notification, the
//! fixed-interval poll worker and manual calls all end up there, which keeps
//! the at-least-once delivery of those triggers harmless.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use navalha_access::{Capability, CapabilityPolicy, DeviceContext, authorize};
use navalha_caixa::{
    Expense, Movement, MovementFilter, MovementKind, PaidBy, PaymentMethod, SessionSnapshot,
    SessionStatus, SessionTotals, reconcile,
};
use navalha_core::{ExpenseId, LedgerError, LedgerResult, Money, MovementId, SessionId};

use crate::cache::LocalCache;
use crate::queue::{CommandQueue, QueueError};
use crate::remote::RemoteLedger;
use crate::types::{CaixaCommand, ConnectivityState};

fn map_queue(e: QueueError) -> LedgerError {
    LedgerError::network(format!("command queue: {e}"))
}

#[derive(Debug, Clone, Copy)]
struct SyncState {
    connectivity: ConnectivityState,
    last_sync_at: Option<DateTime<Utc>>,
}

/// Device-side coordinator over a remote ledger transport.
pub struct CaixaClient<R> {
    remote: Arc<R>,
    queue: CommandQueue,
    cache: Arc<LocalCache>,
    device: DeviceContext,
    policy: CapabilityPolicy,
    state: RwLock<SyncState>,
    /// Single-writer FIFO drain discipline for the queue.
    flush_lock: tokio::sync::Mutex<()>,
}

impl<R> CaixaClient<R>
where
    R: RemoteLedger,
{
    /// Reference poll period for the background refresh worker.
    pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(30);

    pub fn new(remote: Arc<R>, queue: CommandQueue, device: DeviceContext) -> Self {
        Self {
            remote,
            queue,
            cache: Arc::new(LocalCache::new()),
            device,
            policy: CapabilityPolicy,
            state: RwLock::new(SyncState {
                connectivity: ConnectivityState::Online,
                last_sync_at: None,
            }),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    // ---- observability ----------------------------------------------------

    pub fn is_online(&self) -> bool {
        self.state
            .read()
            .map(|s| s.connectivity == ConnectivityState::Online)
            .unwrap_or(false)
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().ok().and_then(|s| s.last_sync_at)
    }

    pub async fn pending_count(&self) -> LedgerResult<usize> {
        self.queue
            .pending_count(self.device.device_id)
            .await
            .map_err(map_queue)
    }

    /// Connectivity signal from the environment (network watcher, user
    /// toggle). The coordinator also flips this itself on transport results.
    pub fn set_connectivity(&self, connectivity: ConnectivityState) {
        if let Ok(mut state) = self.state.write() {
            if state.connectivity != connectivity {
                tracing::info!(?connectivity, "connectivity changed");
                state.connectivity = connectivity;
            }
        }
    }

    fn note_synced(&self) {
        if let Ok(mut state) = self.state.write() {
            state.connectivity = ConnectivityState::Online;
            state.last_sync_at = Some(Utc::now());
        }
    }

    // ---- commands ---------------------------------------------------------

    /// Open the daily session.
    ///
    /// The session id is generated here so the offline path and the durable
    /// store agree on identity once the command flushes.
    pub async fn open(
        &self,
        opening_balance: Money,
        notes: Option<String>,
    ) -> LedgerResult<SessionSnapshot> {
        self.authorize(Capability::OpenSession)?;
        if opening_balance.is_negative() {
            return Err(LedgerError::validation(
                "opening balance must not be negative",
            ));
        }
        if self.cache.open_session_id().is_some() {
            return Err(LedgerError::session_state("a session is already open"));
        }

        let session_id = SessionId::new();
        let opened_at = Utc::now();
        let snapshot = SessionSnapshot {
            session_id,
            status: SessionStatus::Open,
            opened_at,
            closed_at: None,
            opening_balance,
            opening_notes: notes.clone(),
            counted_balance: None,
            closing_notes: None,
            movements: Vec::new(),
            expenses: Vec::new(),
            reconciliation: None,
            version: 0,
        };

        self.cache.apply_open(snapshot.clone());
        self.submit(CaixaCommand::Open {
            session_id,
            opening_balance,
            notes,
            opened_at,
        })
        .await?;

        Ok(snapshot)
    }

    /// Close the open session against the counted drawer balance.
    ///
    /// The reconciliation is computed against the local projection so the
    /// operator sees the outcome immediately; the durable store recomputes
    /// it from its own state when the command lands.
    pub async fn close(
        &self,
        counted_balance: Money,
        notes: Option<String>,
    ) -> LedgerResult<SessionSnapshot> {
        self.authorize(Capability::CloseSession)?;
        if counted_balance.is_negative() {
            return Err(LedgerError::validation(
                "counted balance must not be negative",
            ));
        }
        let Some(current) = self.cache.current().filter(|s| s.is_open()) else {
            return Err(LedgerError::session_state("no open session"));
        };

        let closed_at = Utc::now();
        let expected = current.totals().saldo_dinheiro();
        let reconciliation = reconcile(current.session_id, expected, counted_balance, closed_at);

        let mut snapshot = current;
        snapshot.status = SessionStatus::Closed;
        snapshot.closed_at = Some(closed_at);
        snapshot.counted_balance = Some(counted_balance);
        snapshot.closing_notes = notes.clone();
        snapshot.reconciliation = Some(reconciliation);

        self.cache.apply_close(snapshot.clone());
        self.submit(CaixaCommand::Close {
            session_id: snapshot.session_id,
            counted_balance,
            notes,
            closed_at,
        })
        .await?;

        Ok(snapshot)
    }

    /// Append a movement to the open session.
    ///
    /// Validation and the sangria cash floor run against the local
    /// projection before any state changes; the durable store re-checks
    /// both under its own transaction.
    pub async fn record_movement(&self, movement: Movement) -> LedgerResult<Movement> {
        match movement.kind {
            MovementKind::Sangria => self.authorize(Capability::Sangria)?,
            MovementKind::Reforco => self.authorize(Capability::Reforco)?,
            MovementKind::Entrada | MovementKind::Saida => {}
        }
        movement.validate()?;

        let Some(open_id) = self.cache.open_session_id() else {
            return Err(LedgerError::session_state("no open session"));
        };
        if movement.session_id != open_id {
            return Err(LedgerError::validation(
                "movement targets a different session",
            ));
        }

        if movement.kind == MovementKind::Sangria {
            let available = self
                .cache
                .totals()
                .map(|t| t.saldo_dinheiro())
                .unwrap_or(Money::ZERO);
            if movement.amount > available {
                return Err(LedgerError::insufficient_funds(movement.amount, available));
            }
        }

        self.cache.apply_movement(&movement)?;
        self.submit(CaixaCommand::RecordMovement {
            movement: movement.clone(),
        })
        .await?;

        Ok(movement)
    }

    /// Payment-completion boundary: a settled comanda becomes an entrada.
    pub async fn record_entrada(
        &self,
        amount: Money,
        method: PaymentMethod,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> LedgerResult<Movement> {
        let session_id = self.open_session_or_err()?;
        self.record_movement(Movement {
            id: MovementId::new(),
            session_id,
            kind: MovementKind::Entrada,
            category: category.into(),
            amount,
            payment_method: Some(method),
            description: description.into(),
            created_at: Utc::now(),
        })
        .await
    }

    /// Money paid out of the drawer.
    pub async fn record_saida(
        &self,
        amount: Money,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> LedgerResult<Movement> {
        let session_id = self.open_session_or_err()?;
        self.record_movement(Movement {
            id: MovementId::new(),
            session_id,
            kind: MovementKind::Saida,
            category: category.into(),
            amount,
            payment_method: None,
            description: description.into(),
            created_at: Utc::now(),
        })
        .await
    }

    /// Cash withdrawal for safekeeping.
    pub async fn record_sangria(
        &self,
        amount: Money,
        reason: impl Into<String>,
    ) -> LedgerResult<Movement> {
        let session_id = self.open_session_or_err()?;
        self.record_movement(Movement {
            id: MovementId::new(),
            session_id,
            kind: MovementKind::Sangria,
            category: "sangria".to_string(),
            amount,
            payment_method: None,
            description: reason.into(),
            created_at: Utc::now(),
        })
        .await
    }

    /// Cash added to replenish change.
    pub async fn record_reforco(
        &self,
        amount: Money,
        reason: impl Into<String>,
    ) -> LedgerResult<Movement> {
        let session_id = self.open_session_or_err()?;
        self.record_movement(Movement {
            id: MovementId::new(),
            session_id,
            kind: MovementKind::Reforco,
            category: "reforco".to_string(),
            amount,
            payment_method: None,
            description: reason.into(),
            created_at: Utc::now(),
        })
        .await
    }

    /// Record a despesa. Attached to the open session when there is one;
    /// an owner-paid despesa without a session goes to the loose log on the
    /// durable side.
    pub async fn record_despesa(
        &self,
        description: impl Into<String>,
        category: impl Into<String>,
        amount: Money,
        paid_by: PaidBy,
        notes: Option<String>,
    ) -> LedgerResult<Expense> {
        self.authorize(Capability::Despesa)?;

        let session_id = self.cache.open_session_id();
        if paid_by == PaidBy::Caixa && session_id.is_none() {
            return Err(LedgerError::session_state(
                "drawer-paid expense requires an open session",
            ));
        }

        let expense = Expense {
            id: ExpenseId::new(),
            session_id,
            description: description.into(),
            category: category.into(),
            amount,
            paid_by,
            notes,
            created_at: Utc::now(),
        };
        expense.validate()?;

        if expense.session_id.is_some() {
            self.cache.apply_expense(&expense)?;
        }
        self.submit(CaixaCommand::RecordExpense {
            expense: expense.clone(),
        })
        .await?;

        Ok(expense)
    }

    // ---- queries (served from the local cache) ----------------------------

    pub fn current_session(&self) -> Option<SessionSnapshot> {
        self.cache.current()
    }

    pub fn totals(&self) -> Option<SessionTotals> {
        self.cache.totals()
    }

    pub fn movements(&self, filter: &MovementFilter) -> Vec<Movement> {
        self.cache.movements(filter)
    }

    // ---- sync -------------------------------------------------------------

    /// Push-notification hook: the durable store (or its event bus) signals
    /// that something changed. Funnels into the same refresh path as the
    /// poll and manual refresh.
    pub async fn notify_changed(&self) {
        if let Err(e) = self.refresh().await {
            tracing::debug!(error = %e, "notification-triggered refresh failed");
        }
    }

    /// The single refresh path: drain the queue, then rebuild the cache
    /// from the durable store. Transient transport failures degrade the
    /// connectivity indicator and nothing else.
    pub async fn refresh(&self) -> LedgerResult<()> {
        self.flush().await?;

        if self.pending_count().await? > 0 {
            // Still parked work the store has not seen; keep the optimistic
            // view rather than clobbering it with a stale snapshot.
            return Ok(());
        }

        match self.remote.fetch_current().await {
            Ok(snapshot) => {
                self.cache.replace(snapshot);
                self.note_synced();
                Ok(())
            }
            Err(e) if e.is_transient() => {
                self.set_connectivity(ConnectivityState::Offline);
                Ok(())
            }
            Err(e) => Err(e.into_ledger_error()),
        }
    }

    /// Replay parked commands in local creation order.
    ///
    /// Each command carries its idempotency key, so a re-send after a lost
    /// ack cannot double-apply. A transient failure stops the drain and
    /// leaves the remainder pending; a deterministic rejection parks that
    /// command as failed (compensating entry required) and continues.
    pub async fn flush(&self) -> LedgerResult<usize> {
        let _guard = self.flush_lock.lock().await;

        let pending = self
            .queue
            .list_pending(self.device.device_id)
            .await
            .map_err(map_queue)?;

        let mut flushed = 0usize;
        for queued in pending {
            let command = match queued.command() {
                Ok(command) => command,
                Err(e) => {
                    self.queue
                        .mark_failed(queued.id, format!("undecodable payload: {e}"))
                        .await
                        .map_err(map_queue)?;
                    continue;
                }
            };

            self.queue.mark_syncing(queued.id).await.map_err(map_queue)?;

            match self.remote.execute(&command, &self.device).await {
                Ok(()) => {
                    self.queue.mark_synced(queued.id).await.map_err(map_queue)?;
                    flushed += 1;
                }
                Err(e) if e.is_transient() => {
                    self.queue.requeue(queued.id).await.map_err(map_queue)?;
                    self.set_connectivity(ConnectivityState::Offline);
                    tracing::debug!(
                        flushed,
                        error = %e,
                        "flush interrupted; remaining commands stay pending"
                    );
                    return Ok(flushed);
                }
                Err(e) => {
                    tracing::warn!(
                        id = %queued.id,
                        kind = %queued.kind,
                        error = %e,
                        "queued command rejected; a compensating entry is required"
                    );
                    self.queue
                        .mark_failed(queued.id, e.to_string())
                        .await
                        .map_err(map_queue)?;
                }
            }
        }

        if flushed > 0 {
            self.note_synced();
        }
        Ok(flushed)
    }

    // ---- internals --------------------------------------------------------

    fn authorize(&self, capability: Capability) -> LedgerResult<()> {
        let caps = self
            .policy
            .capabilities_for(self.device.class, &self.device.role);
        authorize(&caps, capability)
    }

    fn open_session_or_err(&self) -> LedgerResult<SessionId> {
        self.cache
            .open_session_id()
            .ok_or_else(|| LedgerError::session_state("no open session"))
    }

    /// Write through when online, enqueue when not. Deterministic remote
    /// rejections mean the optimistic apply ran against a stale projection:
    /// heal the cache with a refresh and surface the error.
    async fn submit(&self, command: CaixaCommand) -> LedgerResult<()> {
        if self.is_online() {
            match self.remote.execute(&command, &self.device).await {
                Ok(()) => {
                    self.note_synced();
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        kind = command.kind(),
                        error = %e,
                        "write-through failed; queuing command"
                    );
                    self.set_connectivity(ConnectivityState::Offline);
                }
                Err(e) => {
                    let mapped = e.into_ledger_error();
                    if let Err(refresh_err) = self.refresh().await {
                        tracing::warn!(error = %refresh_err, "post-rejection refresh failed");
                    }
                    return Err(mapped);
                }
            }
        }

        self.queue
            .enqueue(self.device.device_id, &command)
            .await
            .map_err(map_queue)?;
        Ok(())
    }
}

impl<R> CaixaClient<R>
where
    R: RemoteLedger + 'static,
{
    /// Start the fixed-interval refresh worker.
    ///
    /// The interval fires independently of connectivity events and acts as
    /// the fallback when change notifications are missed or unsupported.
    /// The worker runs on its own task and never blocks command issuance;
    /// repeated failures back off exponentially (capped) before the next
    /// attempt.
    pub fn spawn_refresh_worker(self: Arc<Self>, period: Duration) -> BackgroundSync {
        let shutdown = Arc::new(Notify::new());
        let shutdown_rx = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            tracing::info!(?period, "background refresh worker started");

            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let mut consecutive_failures = 0u32;

            loop {
                tokio::select! {
                    _ = shutdown_rx.notified() => {
                        break;
                    }
                    _ = interval.tick() => {
                        match self.refresh().await {
                            Ok(()) => consecutive_failures = 0,
                            Err(e) => {
                                consecutive_failures += 1;
                                let backoff = std::cmp::min(
                                    Duration::from_secs(1) * (1u32 << consecutive_failures.min(5)),
                                    Duration::from_secs(300),
                                );
                                tracing::warn!(
                                    error = %e,
                                    consecutive_failures,
                                    ?backoff,
                                    "background refresh failed, backing off"
                                );
                                tokio::select! {
                                    _ = shutdown_rx.notified() => break,
                                    _ = tokio::time::sleep(backoff) => {}
                                }
                            }
                        }
                    }
                }
            }

            tracing::info!("background refresh worker stopped");
        });

        BackgroundSync { shutdown, handle }
    }
}

/// Handle to the background refresh worker.
pub struct BackgroundSync {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl BackgroundSync {
    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Wait for the worker to exit.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use serde_json::Value as JsonValue;
    use uuid::Uuid;

    use navalha_access::{DeviceClass, Role};
    use navalha_caixa::ReconciliationOutcome;
    use navalha_core::DeviceId;
    use navalha_events::{EventEnvelope, InMemoryEventBus};
    use navalha_infra::{CaixaService, InMemorySessionStore};

    type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;
    type Service = CaixaService<Arc<InMemorySessionStore>, Arc<Bus>>;

    /// In-memory transport over a real service, with fault injection.
    struct FakeRemote {
        service: Service,
        online: AtomicBool,
        executes: AtomicUsize,
    }

    impl FakeRemote {
        fn new() -> Arc<Self> {
            let store = Arc::new(InMemorySessionStore::new());
            let bus = Arc::new(Bus::new());
            Arc::new(Self {
                service: CaixaService::new(store, bus, CapabilityPolicy),
                online: AtomicBool::new(true),
                executes: AtomicUsize::new(0),
            })
        }

        fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }

        fn executes(&self) -> usize {
            self.executes.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl RemoteLedger for FakeRemote {
        async fn execute(
            &self,
            command: &CaixaCommand,
            device: &DeviceContext,
        ) -> Result<(), crate::remote::RemoteError> {
            use crate::remote::RemoteError;

            if !self.online.load(Ordering::SeqCst) {
                return Err(RemoteError::Network("store unreachable".to_string()));
            }
            self.executes.fetch_add(1, Ordering::SeqCst);

            let result = match command.clone() {
                CaixaCommand::Open {
                    session_id,
                    opening_balance,
                    notes,
                    opened_at,
                } => self
                    .service
                    .open_with_id(session_id, opening_balance, notes, opened_at, device)
                    .map(|_| ()),
                CaixaCommand::Close {
                    session_id,
                    counted_balance,
                    notes,
                    closed_at,
                } => self
                    .service
                    .close_session(session_id, counted_balance, notes, closed_at, device)
                    .map(|_| ()),
                CaixaCommand::RecordMovement { movement } => {
                    self.service.record_movement(movement, device).map(|_| ())
                }
                CaixaCommand::RecordExpense { expense } => {
                    self.service.record_expense(expense, device).map(|_| ())
                }
            };

            result.map_err(|e| match e {
                LedgerError::SyncConflict(m) => RemoteError::Conflict(m),
                LedgerError::Network(m) => RemoteError::Network(m),
                other => RemoteError::Rejected(other),
            })
        }

        async fn fetch_current(
            &self,
        ) -> Result<Option<SessionSnapshot>, crate::remote::RemoteError> {
            use crate::remote::RemoteError;

            if !self.online.load(Ordering::SeqCst) {
                return Err(RemoteError::Network("store unreachable".to_string()));
            }
            self.service
                .current_session()
                .map_err(RemoteError::Rejected)
        }
    }

    fn temp_queue_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("navalha-client-{}.db", Uuid::now_v7()))
    }

    fn trusted() -> DeviceContext {
        DeviceContext::new(DeviceId::new(), DeviceClass::Trusted, Role::STAFF)
    }

    fn kiosk() -> DeviceContext {
        DeviceContext::new(DeviceId::new(), DeviceClass::Kiosk, Role::STAFF)
    }

    async fn client_for(
        remote: &Arc<FakeRemote>,
        device: DeviceContext,
    ) -> (Arc<CaixaClient<FakeRemote>>, CommandQueue) {
        let queue = CommandQueue::open(temp_queue_path()).await.unwrap();
        let client = Arc::new(CaixaClient::new(remote.clone(), queue.clone(), device));
        (client, queue)
    }

    #[tokio::test]
    async fn online_commands_write_through() {
        let remote = FakeRemote::new();
        let (client, _) = client_for(&remote, trusted()).await;

        let opened = client.open(Money::from_centavos(10_000), None).await.unwrap();
        client
            .record_entrada(
                Money::from_centavos(5_000),
                PaymentMethod::Dinheiro,
                "venda",
                "corte",
            )
            .await
            .unwrap();

        // Durable immediately, nothing queued.
        let durable = remote.service.current_session().unwrap().unwrap();
        assert_eq!(durable.session_id, opened.session_id);
        assert_eq!(durable.movements.len(), 1);
        assert_eq!(client.pending_count().await.unwrap(), 0);
        assert!(client.is_online());
        assert!(client.last_sync_at().is_some());
    }

    #[tokio::test]
    async fn offline_movement_is_optimistic_durable_and_flushed_once() {
        let remote = FakeRemote::new();
        let (client, _) = client_for(&remote, trusted()).await;

        client.open(Money::from_centavos(10_000), None).await.unwrap();

        // The network goes away mid-session.
        remote.set_online(false);
        client
            .record_entrada(
                Money::from_centavos(5_000),
                PaymentMethod::Dinheiro,
                "venda",
                "corte",
            )
            .await
            .expect("network failure must not fail the command");

        // Optimistically visible, parked in the queue, indicator degraded.
        assert_eq!(client.current_session().unwrap().movements.len(), 1);
        assert_eq!(
            client.totals().unwrap().saldo_dinheiro(),
            Money::from_centavos(15_000)
        );
        assert_eq!(client.pending_count().await.unwrap(), 1);
        assert!(!client.is_online());
        assert!(remote.service.current_session().unwrap().unwrap().movements.is_empty());

        // Connectivity returns; a manual refresh drains the queue.
        remote.set_online(true);
        client.refresh().await.unwrap();

        let durable = remote.service.current_session().unwrap().unwrap();
        assert_eq!(durable.movements.len(), 1);
        assert_eq!(client.pending_count().await.unwrap(), 0);
        assert!(client.is_online());

        // The cache now mirrors the durable store, stream revision included.
        assert_eq!(client.current_session().unwrap().version, 2);

        // Another flush finds nothing and nothing doubles.
        assert_eq!(client.flush().await.unwrap(), 0);
        assert_eq!(
            remote.service.current_session().unwrap().unwrap().movements.len(),
            1
        );
    }

    #[tokio::test]
    async fn open_issued_offline_lands_with_the_same_identity() {
        let remote = FakeRemote::new();
        let (client, _) = client_for(&remote, trusted()).await;

        remote.set_online(false);
        let opened = client.open(Money::from_centavos(2_000), None).await.unwrap();
        assert_eq!(client.pending_count().await.unwrap(), 1);
        assert!(remote.service.current_session().unwrap().is_none());

        remote.set_online(true);
        client.refresh().await.unwrap();

        let durable = remote.service.current_session().unwrap().unwrap();
        assert_eq!(durable.session_id, opened.session_id);
        assert_eq!(durable.opening_balance, Money::from_centavos(2_000));
    }

    #[tokio::test]
    async fn replayed_flush_after_lost_ack_applies_once() {
        let remote = FakeRemote::new();
        let (client, queue) = client_for(&remote, trusted()).await;

        client.open(Money::from_centavos(10_000), None).await.unwrap();

        remote.set_online(false);
        let movement = client
            .record_entrada(
                Money::from_centavos(1_000),
                PaymentMethod::Pix,
                "venda",
                "escova",
            )
            .await
            .unwrap();

        remote.set_online(true);
        assert_eq!(client.flush().await.unwrap(), 1);

        // Simulate a crash after the send but before the local ack: the
        // command is back in line and gets re-sent.
        queue.requeue(Uuid::from(movement.id)).await.unwrap();
        assert_eq!(client.flush().await.unwrap(), 1);

        let durable = remote.service.current_session().unwrap().unwrap();
        assert_eq!(durable.movements.len(), 1);
        assert_eq!(
            durable.totals().saldo(),
            Money::from_centavos(11_000)
        );
    }

    #[tokio::test]
    async fn permission_precheck_has_no_side_effects() {
        let remote = FakeRemote::new();
        let (client, _) = client_for(&remote, kiosk()).await;

        let err = client.open(Money::from_centavos(1_000), None).await.unwrap_err();
        assert!(matches!(err, LedgerError::PermissionDenied(_)));

        assert!(client.current_session().is_none());
        assert_eq!(client.pending_count().await.unwrap(), 0);
        assert_eq!(remote.executes(), 0);
    }

    #[tokio::test]
    async fn sangria_floor_is_enforced_before_any_mutation() {
        let remote = FakeRemote::new();
        let (client, _) = client_for(&remote, trusted()).await;

        client.open(Money::from_centavos(10_000), None).await.unwrap();
        remote.set_online(false);

        let err = client
            .record_sangria(Money::from_centavos(10_001), "deposito")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(client.pending_count().await.unwrap(), 0);
        assert_eq!(client.current_session().unwrap().movements.len(), 0);

        client
            .record_sangria(Money::from_centavos(4_000), "deposito")
            .await
            .unwrap();
        assert_eq!(
            client.totals().unwrap().saldo_dinheiro(),
            Money::from_centavos(6_000)
        );
    }

    #[tokio::test]
    async fn close_issued_offline_reconciles_locally_then_durably() {
        let remote = FakeRemote::new();
        let (client, _) = client_for(&remote, trusted()).await;

        let opened = client.open(Money::from_centavos(10_000), None).await.unwrap();
        client
            .record_despesa("toalhas", "material", Money::from_centavos(2_000), PaidBy::Caixa, None)
            .await
            .unwrap();
        client
            .record_entrada(
                Money::from_centavos(5_000),
                PaymentMethod::Dinheiro,
                "venda",
                "corte",
            )
            .await
            .unwrap();

        remote.set_online(false);
        let closed = client
            .close(Money::from_centavos(12_500), None)
            .await
            .unwrap();
        let rec = closed.reconciliation.expect("local reconciliation");
        assert_eq!(rec.outcome, ReconciliationOutcome::Shortage);
        assert_eq!(rec.variance, Money::from_centavos(-500));

        remote.set_online(true);
        client.refresh().await.unwrap();

        // The durable store closed the same session with the same outcome,
        // and the open slot is free again.
        let durable = remote.service.session(opened.session_id).unwrap().unwrap();
        let durable_rec = durable.reconciliation.expect("durable reconciliation");
        assert_eq!(durable_rec.outcome, ReconciliationOutcome::Shortage);
        assert_eq!(durable_rec.variance, Money::from_centavos(-500));
        assert!(remote.service.current_session().unwrap().is_none());
        assert!(client.current_session().is_none());
    }

    #[tokio::test]
    async fn loose_despesa_is_accepted_without_a_session() {
        let remote = FakeRemote::new();
        let (client, _) = client_for(&remote, trusted()).await;

        let err = client
            .record_despesa("toalhas", "material", Money::from_centavos(500), PaidBy::Caixa, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SessionState(_)));

        client
            .record_despesa("tinta", "material", Money::from_centavos(500), PaidBy::Dono, None)
            .await
            .unwrap();
        assert_eq!(remote.service.loose_expenses().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn notification_and_manual_refresh_share_one_path() {
        let remote = FakeRemote::new();
        let (terminal, _) = client_for(&remote, trusted()).await;
        let (observer, _) = client_for(&remote, trusted()).await;

        terminal.open(Money::from_centavos(10_000), None).await.unwrap();
        assert!(observer.current_session().is_none());

        // A change notification lands on the observer.
        observer.notify_changed().await;
        let seen = observer.current_session().unwrap();
        assert_eq!(
            seen.session_id,
            terminal.current_session().unwrap().session_id
        );
        assert!(observer.last_sync_at().is_some());
    }

    #[tokio::test]
    async fn interval_poll_is_a_refresh_fallback() {
        let remote = FakeRemote::new();
        let (terminal, _) = client_for(&remote, trusted()).await;
        let (observer, _) = client_for(&remote, trusted()).await;

        let worker = observer.clone().spawn_refresh_worker(Duration::from_secs(30));

        terminal.open(Money::from_centavos(10_000), None).await.unwrap();

        // No notification was delivered; the fixed-interval poll catches up
        // within a few periods.
        for _ in 0..8 {
            if observer.current_session().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(15)).await;
        }
        assert!(observer.current_session().is_some());

        worker.shutdown();
        worker.join().await;
    }

    #[tokio::test]
    async fn stale_write_through_rejection_heals_the_cache() {
        let remote = FakeRemote::new();
        let (a, _) = client_for(&remote, trusted()).await;
        let (b, _) = client_for(&remote, trusted()).await;

        a.open(Money::from_centavos(1_000), None).await.unwrap();

        // b has not refreshed and tries to open its own session.
        let err = b.open(Money::from_centavos(2_000), None).await.unwrap_err();
        assert!(matches!(err, LedgerError::SessionState(_)));

        // The failed optimistic open was rolled back by the healing refresh:
        // b now sees a's session.
        let seen = b.current_session().unwrap();
        assert_eq!(seen.opening_balance, Money::from_centavos(1_000));
    }
}
