//! FILENAME: core/sync-engine/src/execute.rs
//! PURPOSE: Runs a mutation plan against a store.
//! CONTEXT: Steps run one at a time in plan order. There is no rollback: a
//! failure leaves the earlier steps applied, and the change feed brings the
//! local snapshot back in line with whatever the store now holds.

use engine::logging::PLAN;
use engine::{log_debug, log_error};
use persistence::{Store, StoreResult};

use crate::plan::{Mutation, MutationPlan};

/// Executes `plan` and returns the number of steps applied.
pub async fn execute_plan<S: Store + ?Sized>(store: &S, plan: &MutationPlan) -> StoreResult<usize> {
    for (step, mutation) in plan.mutations.iter().enumerate() {
        if let Err(e) = apply(store, mutation).await {
            log_error!(
                PLAN,
                "'{}' failed at step {}/{}: {}",
                plan.description,
                step + 1,
                plan.mutations.len(),
                e
            );
            return Err(e);
        }
    }
    log_debug!(PLAN, "'{}' applied ({} steps)", plan.description, plan.mutations.len());
    Ok(plan.mutations.len())
}

async fn apply<S: Store + ?Sized>(store: &S, mutation: &Mutation) -> StoreResult<()> {
    match mutation {
        Mutation::UpdateRowOrder { entity_id, row_order } => {
            store.update_row_order(*entity_id, *row_order).await?;
        }
        Mutation::UpdateValue {
            entity_id,
            attribute_id,
            value_text,
        } => {
            store
                .update_value(*entity_id, *attribute_id, value_text.clone())
                .await?;
        }
        Mutation::UpsertFacts(facts) => store.upsert_facts(facts.clone()).await?,
        Mutation::UpsertAttributes(attributes) => {
            store.upsert_attributes(attributes.clone()).await?
        }
        Mutation::InsertEntity(entity) => store.insert_entity(entity.clone()).await?,
        Mutation::DeleteFacts { entity_id } => {
            store.delete_facts(*entity_id).await?;
        }
        Mutation::DeleteEntity { entity_id } => store.delete_entity(*entity_id).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{Attribute, Entity, Fact};
    use persistence::{MemoryStore, StoreDump, StoreError};

    fn store() -> MemoryStore {
        MemoryStore::from_dump(StoreDump {
            entities: vec![Entity::new(1, "a"), Entity::new(2, "b")],
            attributes: vec![Attribute::new(1, "Name", 0)],
            values: vec![
                Fact::new(1, 1, Some("Alice"), 1.0),
                Fact::new(2, 1, Some("Bob"), 2.0),
            ],
        })
    }

    #[tokio::test]
    async fn applies_steps_in_order() {
        let store = store();
        let mut plan = MutationPlan::new("Delete row 1");
        plan.push(Mutation::DeleteFacts { entity_id: 1 });
        plan.push(Mutation::DeleteEntity { entity_id: 1 });

        assert_eq!(execute_plan(&store, &plan).await.unwrap(), 2);
        let dump = store.dump().unwrap();
        assert_eq!(dump.entities, vec![Entity::new(2, "b")]);
        assert_eq!(dump.values.len(), 1);
    }

    #[tokio::test]
    async fn stops_at_first_failure_without_rollback() {
        let store = store();
        let mut plan = MutationPlan::new("Edit");
        plan.push(Mutation::UpdateRowOrder { entity_id: 2, row_order: 0.5 });
        plan.push(Mutation::UpdateValue {
            entity_id: 9,
            attribute_id: 1,
            value_text: None,
        });
        plan.push(Mutation::DeleteEntity { entity_id: 1 });

        let err = execute_plan(&store, &plan).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let dump = store.dump().unwrap();
        assert_eq!(dump.values[0], Fact::new(2, 1, Some("Bob"), 0.5));
        assert_eq!(dump.entities.len(), 2);
    }

    #[tokio::test]
    async fn empty_plan_is_a_no_op() {
        let store = store();
        assert_eq!(execute_plan(&store, &MutationPlan::new("nothing")).await.unwrap(), 0);
    }
}
