//! FILENAME: core/sync-engine/src/session.rs
//! PURPOSE: The facade the UI layer drives.
//! CONTEXT: A session loads the snapshots once, starts the reconciler, and
//! forwards the store's change feed into it. Each edit is planned against
//! the current view, applied locally through the reconciler, then written
//! to the store. The store's own notifications later confirm (or correct)
//! the optimistic view through the usual refetch path.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use engine::logging::SESSION;
use engine::{log_debug, log_info, log_warn, EngineConfig, EntityId};
use persistence::{ChangeEvent, Store};

use crate::error::SyncResult;
use crate::execute::execute_plan;
use crate::plan::{next_entity_id, MutationPlan, MutationPlanner};
use crate::reconciler::{Reconciler, ReconcilerHandle};
use crate::state::{GridSnapshot, GridView};

pub struct GridSession<S> {
    store: Arc<S>,
    planner: MutationPlanner,
    handle: ReconcilerHandle,
    reconciler: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl<S: Store + 'static> GridSession<S> {
    /// Opens a session over `store`.
    ///
    /// `feed` should be subscribed before calling, so that nothing written
    /// between the initial load and the reconciler start is missed.
    pub async fn open(
        store: Arc<S>,
        feed: broadcast::Receiver<ChangeEvent>,
        config: EngineConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        let snapshot = GridSnapshot::load(store.as_ref()).await?;
        let (handle, reconciler) = Reconciler::spawn(Arc::clone(&store), &config, snapshot)?;
        let forwarder = tokio::spawn(forward_feed(feed, handle.clone()));

        let view = handle.view();
        log_info!(
            SESSION,
            "opened: {} rows, {} columns",
            view.rows.len(),
            view.columns.len()
        );

        Ok(GridSession {
            store,
            planner: MutationPlanner::new(config),
            handle,
            reconciler,
            forwarder,
        })
    }

    pub fn view(&self) -> Arc<GridView> {
        self.handle.view()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<GridView>> {
        self.handle.subscribe()
    }

    pub fn handle(&self) -> &ReconcilerHandle {
        &self.handle
    }

    /// Drag row `from` onto the position of row `to`.
    pub async fn move_row(&self, from: EntityId, to: EntityId) -> SyncResult<()> {
        let plan = self.planner.plan_row_move(&self.view(), from, to)?;
        self.commit(plan).await
    }

    /// Places `entity_id` between two adjacent rows (`None` = grid edge).
    pub async fn move_row_between(
        &self,
        entity_id: EntityId,
        lo: Option<EntityId>,
        hi: Option<EntityId>,
    ) -> SyncResult<()> {
        let plan = self
            .planner
            .plan_row_move_between(&self.view(), entity_id, lo, hi)?;
        self.commit(plan).await
    }

    /// Drag column `from` onto the position of column `to`.
    pub async fn move_column(&self, from: &str, to: &str) -> SyncResult<()> {
        let plan = self.planner.plan_column_move(&self.view(), from, to)?;
        self.commit(plan).await
    }

    pub async fn edit_cell(
        &self,
        entity_id: EntityId,
        attribute_name: &str,
        value_text: Option<String>,
    ) -> SyncResult<()> {
        let plan = self
            .planner
            .plan_cell_edit(&self.view(), entity_id, attribute_name, value_text)?;
        self.commit(plan).await
    }

    /// Adds an empty row at the top of the grid and returns its entity id.
    ///
    /// The entities table is read first: an entity left without facts (a
    /// create whose fact upsert failed) still holds its id.
    pub async fn create_row(&self) -> SyncResult<EntityId> {
        let view = self.view();
        let entities = self.store.read_entities().await?;
        let entity_id = next_entity_id(&view, entities.iter().map(|e| e.entity_id));
        let plan = self.planner.plan_row_create(&view, entity_id, Utc::now())?;
        self.commit(plan).await?;
        Ok(entity_id)
    }

    pub async fn delete_row(&self, entity_id: EntityId) -> SyncResult<()> {
        let plan = self.planner.plan_row_delete(&self.view(), entity_id)?;
        self.commit(plan).await
    }

    async fn commit(&self, plan: MutationPlan) -> SyncResult<()> {
        if plan.is_empty() {
            return Ok(());
        }
        if let Some(patch) = plan.local.clone() {
            self.handle.apply_local(patch)?;
        }

        if let Err(e) = execute_plan(self.store.as_ref(), &plan).await {
            // The local patch may no longer match the store; pull both tables.
            log_warn!(SESSION, "'{}' failed, resyncing: {}", plan.description, e);
            if let Err(closed) = self.handle.resync() {
                log_warn!(SESSION, "resync after '{}' not scheduled: {}", plan.description, closed);
            }
            return Err(e.into());
        }
        log_debug!(SESSION, "committed '{}'", plan.description);
        Ok(())
    }
}

impl<S> Drop for GridSession<S> {
    fn drop(&mut self) {
        self.forwarder.abort();
        self.reconciler.abort();
    }
}

async fn forward_feed(mut feed: broadcast::Receiver<ChangeEvent>, handle: ReconcilerHandle) {
    loop {
        let delivered = match feed.recv().await {
            Ok(event) => handle.notify(event),
            Err(RecvError::Lagged(missed)) => {
                log_warn!(SESSION, "change feed lagged, {} notifications missed", missed);
                handle.resync()
            }
            Err(RecvError::Closed) => break,
        };
        if delivered.is_err() {
            break;
        }
    }
    log_debug!(SESSION, "change feed forwarding stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;
    use engine::{Attribute, EngineError, Entity, Fact};
    use persistence::{ChangeKind, MemoryStore, StoreDump, StoreError, Table};
    use crate::error::SyncError;
    use crate::plan::Mutation;

    const WINDOW: Duration = Duration::from_millis(300);

    fn seeded() -> Arc<MemoryStore> {
        let mut values = Vec::new();
        for (entity, name, order) in [(1, "Alice", 1.0), (2, "Bob", 2.0), (3, "Carol", 3.0)] {
            values.push(Fact::new(entity, 1, Some(name), order));
            values.push(Fact::new(entity, 2, Some("2024-01-01T00:00:00.000Z"), order));
        }
        Arc::new(MemoryStore::from_dump(StoreDump {
            entities: vec![Entity::new(1, "a"), Entity::new(2, "b"), Entity::new(3, "c")],
            attributes: vec![Attribute::new(1, "Name", 0), Attribute::new(2, "Created", 1)],
            values,
        }))
    }

    async fn open(store: &Arc<MemoryStore>) -> GridSession<MemoryStore> {
        let feed = store.subscribe();
        GridSession::open(Arc::clone(store), feed, EngineConfig::default())
            .await
            .unwrap()
    }

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    fn row_order(store: &MemoryStore, entity_id: EntityId) -> f64 {
        let dump = store.dump().unwrap();
        dump.values
            .iter()
            .find(|f| f.entity_id == entity_id)
            .map(|f| f.row_order)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn move_row_is_optimistic_and_persisted() {
        let store = seeded();
        let session = open(&store).await;

        session.move_row(3, 2).await.unwrap();
        settle().await;
        assert_eq!(session.view().entity_ids(), vec![1, 3, 2]);
        assert_eq!(row_order(&store, 3), 1.5);
        assert_eq!(row_order(&store, 2), 2.0);

        // Two facts changed: one coalesced refetch.
        sleep(WINDOW + Duration::from_millis(10)).await;
        assert_eq!(store.read_count(Table::Values), 2);
        assert_eq!(session.view().entity_ids(), vec![1, 3, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn move_row_between_neighbors() {
        let store = seeded();
        let session = open(&store).await;

        session.move_row_between(1, Some(3), None).await.unwrap();
        settle().await;
        assert_eq!(session.view().entity_ids(), vec![2, 3, 1]);
        assert_eq!(row_order(&store, 1), 4.0);

        let err = session.move_row_between(2, None, Some(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::Engine(EngineError::NotNeighbors { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn move_column_reassigns_sort_order() {
        let store = seeded();
        let session = open(&store).await;

        session.move_column("Created", "Name").await.unwrap();
        settle().await;
        assert_eq!(session.view().columns[0].name, "Created");

        let attributes = store.dump().unwrap().attributes;
        let orders: Vec<(i64, i64)> = attributes.iter().map(|a| (a.attribute_id, a.sort_order)).collect();
        assert_eq!(orders, vec![(2, 0), (1, 1)]);

        sleep(WINDOW + Duration::from_millis(10)).await;
        assert_eq!(store.read_count(Table::Attributes), 2);
        assert_eq!(session.view().columns[0].name, "Created");
    }

    #[tokio::test(start_paused = true)]
    async fn edit_cell_updates_view_and_store() {
        let store = seeded();
        let session = open(&store).await;

        session
            .edit_cell(2, "Name", Some("Robert".to_string()))
            .await
            .unwrap();
        settle().await;
        assert_eq!(session.view().row(2).unwrap().get("Name"), Some("Robert"));

        sleep(WINDOW + Duration::from_millis(10)).await;
        assert_eq!(session.view().row(2).unwrap().get("Name"), Some("Robert"));

        let err = session.edit_cell(9, "Name", None).await.unwrap_err();
        assert!(matches!(err, SyncError::Engine(EngineError::UnknownEntity(9))));
    }

    #[tokio::test(start_paused = true)]
    async fn create_row_prepends_new_entity() {
        let store = seeded();
        let session = open(&store).await;

        let entity_id = session.create_row().await.unwrap();
        assert_eq!(entity_id, 4);
        settle().await;
        assert_eq!(session.view().entity_ids(), vec![4, 1, 2, 3]);

        let dump = store.dump().unwrap();
        assert!(dump.entities.contains(&Entity::new(4, "new entity")));
        assert_eq!(row_order(&store, 4), 0.0);

        sleep(WINDOW + Duration::from_millis(10)).await;
        let view = session.view();
        assert_eq!(view.entity_ids(), vec![4, 1, 2, 3]);
        assert_eq!(view.row(4).unwrap().get("Name"), Some(""));
        assert!(view.row(4).unwrap().get("Created").unwrap().ends_with('Z'));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_row_removes_entity_everywhere() {
        let store = seeded();
        let session = open(&store).await;

        session.delete_row(1).await.unwrap();
        settle().await;
        assert_eq!(session.view().entity_ids(), vec![2, 3]);

        let dump = store.dump().unwrap();
        assert!(dump.entities.iter().all(|e| e.entity_id != 1));
        assert!(dump.values.iter().all(|f| f.entity_id != 1));

        sleep(WINDOW + Duration::from_millis(10)).await;
        assert_eq!(session.view().entity_ids(), vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_resyncs_from_store() {
        let store = seeded();
        let session = open(&store).await;

        store.set_offline(true);
        let err = session
            .edit_cell(1, "Name", Some("Alicia".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::Unavailable(_))));
        settle().await;
        assert_eq!(session.view().row(1).unwrap().get("Name"), Some("Alicia"));

        store.set_offline(false);
        sleep(WINDOW + Duration::from_millis(10)).await;
        let view = session.view();
        assert_eq!(view.row(1).unwrap().get("Name"), Some("Alice"));
        assert!(view.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn lagged_feed_triggers_full_resync() {
        let store = seeded();
        let (tx, rx) = broadcast::channel(1);
        let session = GridSession::open(Arc::clone(&store), rx, EngineConfig::default())
            .await
            .unwrap();

        for _ in 0..3 {
            tx.send(ChangeEvent::new(Table::Values, ChangeKind::Update)).unwrap();
        }
        sleep(WINDOW + Duration::from_millis(10)).await;

        assert_eq!(store.read_count(Table::Values), 2);
        assert_eq!(store.read_count(Table::Attributes), 2);
        drop(session);
    }

    #[tokio::test(start_paused = true)]
    async fn create_row_skips_ids_of_entities_without_facts() {
        let store = seeded();
        let session = open(&store).await;
        // Left behind by a create whose fact upsert never landed.
        store.insert_entity(Entity::new(4, "new entity")).await.unwrap();

        let entity_id = session.create_row().await.unwrap();
        assert_eq!(entity_id, 5);
        settle().await;
        assert_eq!(session.view().entity_ids(), vec![5, 1, 2, 3]);
        assert_eq!(store.dump().unwrap().entities.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn create_row_without_attributes_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let session = open(&store).await;

        for _ in 0..2 {
            let err = session.create_row().await.unwrap_err();
            assert!(matches!(err, SyncError::Engine(EngineError::NoAttributes)));
        }
        assert!(store.dump().unwrap().entities.is_empty());
        assert!(session.view().rows.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_after_reconciler_exit_reports_store_error() {
        let store = seeded();
        let session = open(&store).await;
        session.reconciler.abort();
        settle().await;

        store.set_offline(true);
        let mut plan = MutationPlan::new("Move row 1");
        plan.push(Mutation::UpdateRowOrder { entity_id: 1, row_order: 0.5 });

        // The resync cannot be scheduled; the write error still surfaces.
        let err = session.commit(plan).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::Unavailable(_))));
        assert!(matches!(session.handle().resync(), Err(SyncError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn open_rejects_split_entity_facts() {
        let store = Arc::new(MemoryStore::from_dump(StoreDump {
            entities: vec![Entity::new(1, "a"), Entity::new(2, "b")],
            attributes: vec![Attribute::new(1, "Name", 0), Attribute::new(2, "Age", 1)],
            values: vec![
                Fact::new(1, 1, Some("Alice"), 1.0),
                Fact::new(2, 1, Some("Bob"), 2.0),
                Fact::new(1, 2, Some("30"), 3.0),
            ],
        }));

        let result = GridSession::open(Arc::clone(&store), store.subscribe(), EngineConfig::default()).await;
        assert!(matches!(
            result,
            Err(SyncError::Engine(EngineError::OrderingViolation { entity_id: 1, .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_config_is_rejected() {
        let store = seeded();
        let config = EngineConfig {
            renumber_step: 0.0,
            ..EngineConfig::default()
        };
        let result = GridSession::open(Arc::clone(&store), store.subscribe(), config).await;
        assert!(matches!(result, Err(SyncError::Engine(EngineError::InvalidConfig(_)))));
    }
}
