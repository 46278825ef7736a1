//! FILENAME: core/persistence/src/memory.rs
//! PURPOSE: In-process implementation of `Store` with a change feed.
//! CONTEXT: Backs tests and local sessions. Every successful write
//! broadcasts one `ChangeEvent` per record touched, the same way a
//! realtime database feed would. Reads are counted per table so callers
//! can observe how many refetches actually happened.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use engine::logging::STORE;
use engine::{log_debug, Attribute, AttributeId, Entity, EntityId, Fact};

use crate::error::{StoreError, StoreResult};
use crate::feed::{ChangeEvent, ChangeKind, Table};
use crate::store::Store;

const FEED_CAPACITY: usize = 1024;

// ============================================================================
// DUMP FORMAT
// ============================================================================

/// Whole-store snapshot, used for seeding and JSON save/load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDump {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub values: Vec<Fact>,
}

// ============================================================================
// MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
struct Tables {
    entities: BTreeMap<EntityId, Entity>,
    attributes: BTreeMap<AttributeId, Attribute>,
    values: BTreeMap<(EntityId, AttributeId), Fact>,
}

#[derive(Debug, Default)]
struct ReadCounters {
    entities: AtomicUsize,
    values: AtomicUsize,
    attributes: AtomicUsize,
}

impl ReadCounters {
    fn counter(&self, table: Table) -> &AtomicUsize {
        match table {
            Table::Entities => &self.entities,
            Table::Values => &self.values,
            Table::Attributes => &self.attributes,
        }
    }
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    feed: broadcast::Sender<ChangeEvent>,
    reads: ReadCounters,
    offline: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        MemoryStore {
            tables: Mutex::new(Tables::default()),
            feed,
            reads: ReadCounters::default(),
            offline: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Builds a store holding exactly `dump`. Seeding emits no change events.
    pub fn from_dump(dump: StoreDump) -> Self {
        let store = MemoryStore::new();
        if let Ok(mut tables) = store.tables.lock() {
            tables.entities = dump.entities.into_iter().map(|e| (e.entity_id, e)).collect();
            tables.attributes = dump
                .attributes
                .into_iter()
                .map(|a| (a.attribute_id, a))
                .collect();
            tables.values = dump.values.into_iter().map(|f| (f.key(), f)).collect();
        }
        store
    }

    pub fn dump(&self) -> StoreResult<StoreDump> {
        let tables = self.tables()?;
        Ok(StoreDump {
            entities: tables.entities.values().cloned().collect(),
            attributes: sorted_attributes(&tables),
            values: sorted_facts(&tables),
        })
    }

    pub fn save_json(&self, path: &Path) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(&self.dump()?)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> StoreResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let dump: StoreDump = serde_json::from_str(&raw)?;
        Ok(MemoryStore::from_dump(dump))
    }

    /// Subscribes to the change feed. Only events after this call are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// Number of full-table reads served for `table`.
    pub fn read_count(&self, table: Table) -> usize {
        self.reads.counter(table).load(Ordering::SeqCst)
    }

    /// While offline every operation fails with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Simulated round-trip time applied before every trait operation.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn round_trip(&self) {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is fine; the feed is fire-and-forget.
        let _ = self.feed.send(event);
    }

    fn publish_fact(&self, kind: ChangeKind, old: Option<&Fact>, new: Option<&Fact>) {
        let mut event = ChangeEvent::new(Table::Values, kind);
        event.old_record = old.and_then(|f| serde_json::to_value(f).ok());
        event.new_record = new.and_then(|f| serde_json::to_value(f).ok());
        self.publish(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_attributes(tables: &Tables) -> Vec<Attribute> {
    let mut attributes: Vec<Attribute> = tables.attributes.values().cloned().collect();
    attributes.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then(a.attribute_id.cmp(&b.attribute_id))
    });
    attributes
}

fn sorted_facts(tables: &Tables) -> Vec<Fact> {
    let mut facts: Vec<Fact> = tables.values.values().cloned().collect();
    // Stable sort over (entity, attribute) keys keeps each entity contiguous on ties.
    facts.sort_by(|a, b| a.row_order.total_cmp(&b.row_order).then(a.entity_id.cmp(&b.entity_id)));
    facts
}

#[async_trait]
impl Store for MemoryStore {
    async fn read_attributes(&self) -> StoreResult<Vec<Attribute>> {
        self.round_trip().await;
        let tables = self.tables()?;
        self.reads.attributes.fetch_add(1, Ordering::SeqCst);
        Ok(sorted_attributes(&tables))
    }

    async fn read_facts(&self) -> StoreResult<Vec<Fact>> {
        self.round_trip().await;
        let tables = self.tables()?;
        self.reads.values.fetch_add(1, Ordering::SeqCst);
        Ok(sorted_facts(&tables))
    }

    async fn read_entities(&self) -> StoreResult<Vec<Entity>> {
        self.round_trip().await;
        let tables = self.tables()?;
        self.reads.entities.fetch_add(1, Ordering::SeqCst);
        Ok(tables.entities.values().cloned().collect())
    }

    async fn update_row_order(&self, entity_id: EntityId, row_order: f64) -> StoreResult<usize> {
        self.round_trip().await;
        let changed: Vec<(Fact, Fact)> = {
            let mut tables = self.tables()?;
            tables
                .values
                .range_mut((entity_id, AttributeId::MIN)..=(entity_id, AttributeId::MAX))
                .map(|(_, fact)| {
                    let old = fact.clone();
                    fact.row_order = row_order;
                    (old, fact.clone())
                })
                .collect()
        };
        log_debug!(STORE, "row_order={} on {} facts of entity {}", row_order, changed.len(), entity_id);
        for (old, new) in &changed {
            self.publish_fact(ChangeKind::Update, Some(old), Some(new));
        }
        Ok(changed.len())
    }

    async fn update_value(
        &self,
        entity_id: EntityId,
        attribute_id: AttributeId,
        value_text: Option<String>,
    ) -> StoreResult<()> {
        self.round_trip().await;
        let (old, new) = {
            let mut tables = self.tables()?;
            let fact = tables.values.get_mut(&(entity_id, attribute_id)).ok_or_else(|| {
                StoreError::NotFound(format!("value ({}, {})", entity_id, attribute_id))
            })?;
            let old = fact.clone();
            fact.value_text = value_text;
            (old, fact.clone())
        };
        self.publish_fact(ChangeKind::Update, Some(&old), Some(&new));
        Ok(())
    }

    async fn upsert_attributes(&self, attributes: Vec<Attribute>) -> StoreResult<()> {
        self.round_trip().await;
        let mut events = Vec::with_capacity(attributes.len());
        {
            let mut tables = self.tables()?;
            let taken = attributes
                .iter()
                .find(|a| {
                    tables.attributes.values().any(|existing| {
                        existing.attribute_name == a.attribute_name
                            && existing.attribute_id != a.attribute_id
                    })
                })
                .map(|a| a.attribute_name.clone());
            if let Some(name) = taken {
                return Err(StoreError::Conflict(format!("attribute name {:?} is taken", name)));
            }
            for attribute in attributes {
                let new = serde_json::to_value(&attribute)?;
                let event = match tables.attributes.insert(attribute.attribute_id, attribute) {
                    Some(old) => ChangeEvent::new(Table::Attributes, ChangeKind::Update)
                        .with_old(serde_json::to_value(&old)?),
                    None => ChangeEvent::new(Table::Attributes, ChangeKind::Insert),
                };
                events.push(event.with_new(new));
            }
        }
        for event in events {
            self.publish(event);
        }
        Ok(())
    }

    async fn upsert_facts(&self, facts: Vec<Fact>) -> StoreResult<()> {
        self.round_trip().await;
        let mut changed = Vec::with_capacity(facts.len());
        {
            let mut tables = self.tables()?;
            for fact in facts {
                let old = tables.values.insert(fact.key(), fact.clone());
                changed.push((old, fact));
            }
        }
        for (old, new) in &changed {
            let kind = if old.is_some() {
                ChangeKind::Update
            } else {
                ChangeKind::Insert
            };
            self.publish_fact(kind, old.as_ref(), Some(new));
        }
        Ok(())
    }

    async fn insert_entity(&self, entity: Entity) -> StoreResult<()> {
        self.round_trip().await;
        let record = serde_json::to_value(&entity)?;
        {
            let mut tables = self.tables()?;
            if tables.entities.contains_key(&entity.entity_id) {
                return Err(StoreError::Conflict(format!("entity {} exists", entity.entity_id)));
            }
            tables.entities.insert(entity.entity_id, entity);
        }
        self.publish(ChangeEvent::new(Table::Entities, ChangeKind::Insert).with_new(record));
        Ok(())
    }

    async fn delete_facts(&self, entity_id: EntityId) -> StoreResult<usize> {
        self.round_trip().await;
        let removed: Vec<Fact> = {
            let mut tables = self.tables()?;
            let keys: Vec<(EntityId, AttributeId)> = tables
                .values
                .range((entity_id, AttributeId::MIN)..=(entity_id, AttributeId::MAX))
                .map(|(key, _)| *key)
                .collect();
            keys.iter().filter_map(|key| tables.values.remove(key)).collect()
        };
        for fact in &removed {
            self.publish_fact(ChangeKind::Delete, Some(fact), None);
        }
        Ok(removed.len())
    }

    async fn delete_entity(&self, entity_id: EntityId) -> StoreResult<()> {
        self.round_trip().await;
        let removed = self.tables()?.entities.remove(&entity_id);
        match removed {
            Some(entity) => {
                let old = serde_json::to_value(&entity).unwrap_or_else(|_| json!({ "entity_id": entity_id }));
                self.publish(ChangeEvent::new(Table::Entities, ChangeKind::Delete).with_old(old));
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("entity {}", entity_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryStore {
        MemoryStore::from_dump(StoreDump {
            entities: vec![Entity::new(1, "a"), Entity::new(2, "b")],
            attributes: vec![Attribute::new(2, "Age", 1), Attribute::new(1, "Name", 0)],
            values: vec![
                Fact::new(2, 1, Some("Bob"), 2.0),
                Fact::new(1, 2, Some("30"), 1.0),
                Fact::new(1, 1, Some("Alice"), 1.0),
            ],
        })
    }

    #[tokio::test]
    async fn reads_are_ordered_and_counted() {
        let store = seeded();
        let attrs = store.read_attributes().await.unwrap();
        let facts = store.read_facts().await.unwrap();

        assert_eq!(attrs[0].attribute_name, "Name");
        let entities: Vec<i64> = facts.iter().map(|f| f.entity_id).collect();
        assert_eq!(entities, vec![1, 1, 2]);
        assert_eq!(store.read_count(Table::Values), 1);
        assert_eq!(store.read_count(Table::Attributes), 1);
        assert_eq!(store.read_count(Table::Entities), 0);
    }

    #[tokio::test]
    async fn update_row_order_touches_one_entity_and_publishes() {
        let store = seeded();
        let mut feed = store.subscribe();

        let touched = store.update_row_order(1, 3.0).await.unwrap();
        assert_eq!(touched, 2);

        let facts = store.read_facts().await.unwrap();
        assert_eq!(facts[0].entity_id, 2);
        assert!(facts.iter().filter(|f| f.entity_id == 1).all(|f| f.row_order == 3.0));

        let event = feed.try_recv().unwrap();
        assert_eq!(event.table, Table::Values);
        assert_eq!(event.event, ChangeKind::Update);
        assert_eq!(event.entity_id(), Some(1));
    }

    #[tokio::test]
    async fn update_value_requires_existing_fact() {
        let store = seeded();
        store.update_value(2, 1, Some("Robert".to_string())).await.unwrap();
        let err = store.update_value(2, 2, Some("40".to_string())).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_entity_and_facts() {
        let store = seeded();
        let mut feed = store.subscribe();

        assert_eq!(store.delete_facts(1).await.unwrap(), 2);
        store.delete_entity(1).await.unwrap();

        let dump = store.dump().unwrap();
        assert_eq!(dump.entities.len(), 1);
        assert_eq!(dump.values.len(), 1);

        let mut last = None;
        while let Ok(event) = feed.try_recv() {
            last = Some(event);
        }
        let last = last.unwrap();
        assert_eq!(last.table, Table::Entities);
        assert_eq!(last.event, ChangeKind::Delete);
        assert_eq!(last.entity_id(), Some(1));

        assert!(matches!(store.delete_entity(1).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn attribute_name_conflict_is_rejected() {
        let store = seeded();
        let err = store
            .upsert_attributes(vec![Attribute::new(9, "Name", 5)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store
            .upsert_attributes(vec![Attribute::new(1, "Name", 1), Attribute::new(2, "Age", 0)])
            .await
            .unwrap();
        assert_eq!(store.read_attributes().await.unwrap()[0].attribute_name, "Age");
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = seeded();
        store.set_offline(true);
        assert!(matches!(store.read_facts().await, Err(StoreError::Unavailable(_))));
        assert!(store.insert_entity(Entity::new(3, "c")).await.is_err());
        assert_eq!(store.read_count(Table::Values), 0);

        store.set_offline(false);
        assert!(store.read_facts().await.is_ok());
    }

    #[tokio::test]
    async fn json_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.json");
        let store = seeded();
        store.save_json(&path).unwrap();

        let loaded = MemoryStore::load_json(&path).unwrap();
        assert_eq!(loaded.dump().unwrap(), store.dump().unwrap());
        assert_eq!(loaded.read_facts().await.unwrap().len(), 3);
    }
}
