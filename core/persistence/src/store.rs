//! FILENAME: core/persistence/src/store.rs
//! PURPOSE: The operations the grid engine needs from its backing store.
//! CONTEXT: Each call is all-or-nothing on its own; nothing spans tables.
//! Reads return whole tables in their order-key order so a refetch can
//! replace a local snapshot wholesale.

use std::sync::Arc;
use async_trait::async_trait;
use engine::{Attribute, AttributeId, Entity, EntityId, Fact};

use crate::error::StoreResult;

#[async_trait]
pub trait Store: Send + Sync {
    /// All attributes ascending by `sort_order`.
    async fn read_attributes(&self) -> StoreResult<Vec<Attribute>>;

    /// All facts ascending by `row_order`, ties broken by `entity_id` so an
    /// entity's facts stay contiguous.
    async fn read_facts(&self) -> StoreResult<Vec<Fact>>;

    /// All entities ascending by `entity_id`.
    async fn read_entities(&self) -> StoreResult<Vec<Entity>>;

    /// Sets `row_order` on every fact of one entity. Returns the facts touched.
    async fn update_row_order(&self, entity_id: EntityId, row_order: f64) -> StoreResult<usize>;

    /// Point update of one fact's text. Fails with `NotFound` if the fact is absent.
    async fn update_value(
        &self,
        entity_id: EntityId,
        attribute_id: AttributeId,
        value_text: Option<String>,
    ) -> StoreResult<()>;

    async fn upsert_attributes(&self, attributes: Vec<Attribute>) -> StoreResult<()>;

    async fn upsert_facts(&self, facts: Vec<Fact>) -> StoreResult<()>;

    async fn insert_entity(&self, entity: Entity) -> StoreResult<()>;

    /// Deletes every fact of one entity. Returns the facts removed.
    async fn delete_facts(&self, entity_id: EntityId) -> StoreResult<usize>;

    async fn delete_entity(&self, entity_id: EntityId) -> StoreResult<()>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn read_attributes(&self) -> StoreResult<Vec<Attribute>> {
        (**self).read_attributes().await
    }

    async fn read_facts(&self) -> StoreResult<Vec<Fact>> {
        (**self).read_facts().await
    }

    async fn read_entities(&self) -> StoreResult<Vec<Entity>> {
        (**self).read_entities().await
    }

    async fn update_row_order(&self, entity_id: EntityId, row_order: f64) -> StoreResult<usize> {
        (**self).update_row_order(entity_id, row_order).await
    }

    async fn update_value(
        &self,
        entity_id: EntityId,
        attribute_id: AttributeId,
        value_text: Option<String>,
    ) -> StoreResult<()> {
        (**self).update_value(entity_id, attribute_id, value_text).await
    }

    async fn upsert_attributes(&self, attributes: Vec<Attribute>) -> StoreResult<()> {
        (**self).upsert_attributes(attributes).await
    }

    async fn upsert_facts(&self, facts: Vec<Fact>) -> StoreResult<()> {
        (**self).upsert_facts(facts).await
    }

    async fn insert_entity(&self, entity: Entity) -> StoreResult<()> {
        (**self).insert_entity(entity).await
    }

    async fn delete_facts(&self, entity_id: EntityId) -> StoreResult<usize> {
        (**self).delete_facts(entity_id).await
    }

    async fn delete_entity(&self, entity_id: EntityId) -> StoreResult<()> {
        (**self).delete_entity(entity_id).await
    }
}
