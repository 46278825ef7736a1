//! FILENAME: core/sync-engine/src/reconciler.rs
//! PURPOSE: Keeps the local snapshots in line with the store's change feed.
//! CONTEXT: The reconciler runs as a single tokio task and is the only
//! writer of the current view. Notifications and local patches arrive on one
//! command channel and are handled in arrival order. Every new view is
//! published on a watch channel, which is what the UI reads.
//!
//! - `entities` deletes remove the entity's row at once, with no read.
//! - `values` and `attributes` events (any kind) restart that table's
//!   debounce window. When the window elapses the whole table is re-read and
//!   replaces the snapshot. A refetch already in flight is never cancelled;
//!   results land in completion order, the last one wins.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use engine::logging::RECONCILE;
use engine::{log_debug, log_info, log_warn, Attribute, EngineConfig, EngineResult, Fact};
use persistence::{ChangeEvent, ChangeKind, Store, StoreResult, Table};

use crate::debounce::{Debouncer, Fired};
use crate::error::{SyncError, SyncResult};
use crate::state::{GridSnapshot, GridView, LocalPatch};

#[derive(Debug)]
enum Command {
    Notify(ChangeEvent),
    ApplyLocal(LocalPatch),
    Resync,
}

enum Refetched {
    Values(StoreResult<Vec<Fact>>),
    Attributes(StoreResult<Vec<Attribute>>),
}

// ============================================================================
// HANDLE
// ============================================================================

/// Cheap, cloneable access to a running reconciler.
#[derive(Clone)]
pub struct ReconcilerHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<Arc<GridView>>,
}

impl ReconcilerHandle {
    /// Delivers one change-feed notification. Never blocks.
    pub fn notify(&self, event: ChangeEvent) -> SyncResult<()> {
        self.send(Command::Notify(event))
    }

    /// Applies an optimistic local change ahead of the store round trip.
    pub fn apply_local(&self, patch: LocalPatch) -> SyncResult<()> {
        self.send(Command::ApplyLocal(patch))
    }

    /// Schedules a refetch of both tables, e.g. after missed notifications.
    pub fn resync(&self) -> SyncResult<()> {
        self.send(Command::Resync)
    }

    /// The most recently published view.
    pub fn view(&self) -> Arc<GridView> {
        Arc::clone(&self.view.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<GridView>> {
        self.view.clone()
    }

    fn send(&self, command: Command) -> SyncResult<()> {
        self.commands.send(command).map_err(|_| SyncError::Closed)
    }
}

// ============================================================================
// ACTOR
// ============================================================================

pub struct Reconciler<S> {
    store: Arc<S>,
    current: Arc<GridView>,
    debouncer: Debouncer<Table>,
    fired_rx: mpsc::UnboundedReceiver<Fired<Table>>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    refetch_tx: mpsc::UnboundedSender<Refetched>,
    refetch_rx: mpsc::UnboundedReceiver<Refetched>,
    published: watch::Sender<Arc<GridView>>,
}

impl<S: Store + 'static> Reconciler<S> {
    /// Pivots the initial snapshot and starts the reconciler task.
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        store: Arc<S>,
        config: &EngineConfig,
        initial: GridSnapshot,
    ) -> EngineResult<(ReconcilerHandle, JoinHandle<()>)> {
        let current = Arc::new(GridView::build(initial, 1)?);
        let (published, view) = watch::channel(Arc::clone(&current));
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (refetch_tx, refetch_rx) = mpsc::unbounded_channel();
        let (debouncer, fired_rx) = Debouncer::new(config.debounce_window());

        let reconciler = Reconciler {
            store,
            current,
            debouncer,
            fired_rx,
            commands_rx,
            refetch_tx,
            refetch_rx,
            published,
        };
        let task = tokio::spawn(reconciler.run());
        Ok((ReconcilerHandle { commands, view }, task))
    }

    async fn run(mut self) {
        log_debug!(RECONCILE, "started at version {}", self.current.version);
        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(fired) = self.fired_rx.recv() => self.on_fired(fired),
                Some(result) = self.refetch_rx.recv() => self.on_refetched(result),
            }
        }
        self.debouncer.cancel_all();
        log_debug!(RECONCILE, "stopped at version {}", self.current.version);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Notify(event) => self.on_event(event),
            Command::ApplyLocal(patch) => self.apply_local(&patch),
            Command::Resync => {
                self.schedule(Table::Values);
                self.schedule(Table::Attributes);
            }
        }
    }

    fn on_event(&mut self, event: ChangeEvent) {
        match (event.table, event.event) {
            (Table::Entities, ChangeKind::Delete) => match event.entity_id() {
                Some(entity_id) if self.current.index_of(entity_id).is_some() => {
                    log_debug!(RECONCILE, "entity {} deleted remotely", entity_id);
                    self.apply_local(&LocalPatch::RemoveEntity(entity_id));
                }
                Some(_) => {}
                None => log_warn!(RECONCILE, "entity delete without entity_id"),
            },
            (Table::Entities, _) => {}
            (table, _) => self.schedule(table),
        }
    }

    fn schedule(&mut self, table: Table) {
        if self.debouncer.schedule(table) {
            log_debug!(RECONCILE, "{} refetch window restarted", table.name());
        }
    }

    fn on_fired(&mut self, fired: Fired<Table>) {
        if !self.debouncer.accept(&fired) {
            return;
        }
        let table = fired.key;
        log_debug!(RECONCILE, "refetching {}", table.name());

        let store = Arc::clone(&self.store);
        let tx = self.refetch_tx.clone();
        tokio::spawn(async move {
            let result = match table {
                Table::Attributes => Refetched::Attributes(store.read_attributes().await),
                _ => Refetched::Values(store.read_facts().await),
            };
            let _ = tx.send(result);
        });
    }

    fn on_refetched(&mut self, result: Refetched) {
        let snapshot = match result {
            Refetched::Values(Ok(facts)) => {
                log_debug!(RECONCILE, "values refetched ({} facts)", facts.len());
                self.current.snapshot.with_facts(facts)
            }
            Refetched::Attributes(Ok(attributes)) => {
                log_debug!(RECONCILE, "attributes refetched ({})", attributes.len());
                self.current.snapshot.with_attributes(attributes)
            }
            Refetched::Values(Err(e)) | Refetched::Attributes(Err(e)) => {
                self.fail(format!("Refetch failed: {}", e));
                return;
            }
        };

        match GridView::build(snapshot, self.current.version + 1) {
            Ok(view) => self.publish(view),
            Err(e) => self.fail(format!("Refetched snapshot rejected: {}", e)),
        }
    }

    fn apply_local(&mut self, patch: &LocalPatch) {
        let snapshot = patch.apply(&self.current.snapshot);
        match GridView::build(snapshot, self.current.version + 1) {
            Ok(mut view) => {
                view.last_error = self.current.last_error.clone();
                self.publish(view);
            }
            Err(e) => self.fail(format!("Local change rejected: {}", e)),
        }
    }

    /// Keeps the current snapshot and republishes it with the error attached.
    fn fail(&mut self, message: String) {
        log_warn!(RECONCILE, "{}", message);
        let mut view = (*self.current).clone();
        view.version += 1;
        view.last_error = Some(message);
        self.publish(view);
    }

    fn publish(&mut self, view: GridView) {
        log_info!(
            RECONCILE,
            "view v{}: {} rows, {} columns",
            view.version,
            view.rows.len(),
            view.columns.len()
        );
        self.current = Arc::new(view);
        self.published.send_replace(Arc::clone(&self.current));
    }
}
