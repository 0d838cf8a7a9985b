//! Property tests for the entity store.
//!
//! Random operation sequences run against a naive model of the store
//! (entity -> component map), with the structural invariants re-checked
//! after every operation: directory/id-column agreement, sorted unique
//! columns, value round-trips, and canonical archetype identity.

use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use tessera_ecs::prelude::*;

const COMPONENTS: [&str; 3] = ["a", "b", "c"];

#[derive(Debug, Clone)]
enum StoreOp {
    Spawn,
    Delete(usize),
    Set(usize, usize, u64),
    Remove(usize, usize),
    ClearCache,
}

fn op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        3 => Just(StoreOp::Spawn),
        2 => (0..100usize).prop_map(StoreOp::Delete),
        5 => (0..COMPONENTS.len(), 0..100usize, any::<u64>())
            .prop_map(|(c, i, v)| StoreOp::Set(c, i, v)),
        2 => (0..COMPONENTS.len(), 0..100usize).prop_map(|(c, i)| StoreOp::Remove(c, i)),
        1 => Just(StoreOp::ClearCache),
    ]
}

/// The model: per entity, which components it has and their values.
type Model = Vec<(EntityId, BTreeMap<usize, u64>)>;

fn check_invariants(
    store: &EntityStore,
    names: &[NameId],
    model: &Model,
) -> Result<(), TestCaseError> {
    prop_assert_eq!(store.entity_count(), model.len());

    for (entity, components) in model {
        let loc = store
            .location(*entity)
            .expect("model entities are alive in the store");
        let handle = store
            .archetype_at(loc.archetype)
            .expect("live entities point at materialized archetypes");

        // The id column at the directory row holds the entity's own id.
        prop_assert_eq!(handle.entity_at(loc.row), *entity);

        // Columns are unique and sorted ascending by name.
        let metas: Vec<u32> = handle.column_metas().map(|m| m.name.to_raw()).collect();
        prop_assert!(metas.windows(2).all(|w| w[0] < w[1]));

        // Component values round-trip; absent components read as None.
        for (i, &name) in names.iter().enumerate() {
            let expected = components.get(&i);
            let actual = store.get_component::<u64>(*entity, name).unwrap();
            prop_assert_eq!(actual, expected);
            prop_assert_eq!(store.has_component(*entity, name).unwrap(), expected.is_some());
        }
    }

    // Canonicalization: entities with equal component sets share an
    // archetype; entities with different sets never do.
    for (i, (e1, c1)) in model.iter().enumerate() {
        for (e2, c2) in model.iter().skip(i + 1) {
            let a1 = store.location(*e1).unwrap().archetype;
            let a2 = store.location(*e2).unwrap().archetype;
            let same_set = c1.keys().eq(c2.keys());
            prop_assert_eq!(a1 == a2, same_set);
        }
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn random_operations_preserve_store_invariants(
        ops in prop::collection::vec(op_strategy(), 1..60),
    ) {
        let mut store = EntityStore::new();
        let names: Vec<NameId> = COMPONENTS.iter().map(|&n| store.intern(n)).collect();
        let mut model: Model = Vec::new();

        for op in ops {
            match op {
                StoreOp::Spawn => {
                    let e = store.new_entity().unwrap();
                    model.push((e, BTreeMap::new()));
                }
                StoreOp::Delete(i) => {
                    if !model.is_empty() {
                        let (e, _) = model.remove(i % model.len());
                        store.delete_entity(e).unwrap();
                    }
                }
                StoreOp::Set(c, i, v) => {
                    if !model.is_empty() {
                        let i = i % model.len();
                        let e = model[i].0;
                        store.set_component(e, names[c], v).unwrap();
                        model[i].1.insert(c, v);
                    }
                }
                StoreOp::Remove(c, i) => {
                    if !model.is_empty() {
                        let i = i % model.len();
                        let e = model[i].0;
                        store.remove_component(e, names[c]).unwrap();
                        model[i].1.remove(&c);
                    }
                }
                StoreOp::ClearCache => store.clear_cache(),
            }
            check_invariants(&store, &names, &model)?;
        }
    }

    /// Two entities given the same component set in different orders land in
    /// the same archetype.
    #[test]
    fn component_set_identity_is_order_independent(
        order1 in Just(vec![0usize, 1, 2]).prop_shuffle(),
        order2 in Just(vec![0usize, 1, 2]).prop_shuffle(),
    ) {
        let mut store = EntityStore::new();
        let names: Vec<NameId> = COMPONENTS.iter().map(|&n| store.intern(n)).collect();

        let e1 = store.new_entity().unwrap();
        for &c in &order1 {
            store.set_component(e1, names[c], c as u64).unwrap();
        }
        let e2 = store.new_entity().unwrap();
        for &c in &order2 {
            store.set_component(e2, names[c], 100 + c as u64).unwrap();
        }

        prop_assert_eq!(
            store.location(e1).unwrap().archetype,
            store.location(e2).unwrap().archetype,
        );
    }

    /// Queried column slices always agree with per-entity reads.
    #[test]
    fn query_slices_match_point_reads(
        values in prop::collection::vec((any::<u64>(), any::<bool>()), 1..40),
    ) {
        let mut store = EntityStore::new();
        let a = store.intern("a");
        let b = store.intern("b");

        for &(v, with_b) in &values {
            let e = store.new_entity().unwrap();
            store.set_component(e, a, v).unwrap();
            if with_b {
                store.set_component(e, b, v.wrapping_mul(2)).unwrap();
            }
        }

        let mut seen = 0usize;
        for handle in store.query(QueryFilter::all([a])) {
            let entities = handle.entities();
            let column = handle.column::<u64>(a).unwrap();
            prop_assert_eq!(entities.len(), column.len());
            for (entity, value) in entities.iter().zip(column) {
                prop_assert_eq!(store.get_component::<u64>(*entity, a).unwrap(), Some(value));
                seen += 1;
            }
        }
        prop_assert_eq!(seen, values.len());
    }

    /// Deleting any subset of entities leaves every survivor's directory
    /// entry pointing at a row whose id column matches.
    #[test]
    fn swap_remove_never_corrupts_the_directory(
        count in 2..30usize,
        victims in prop::collection::vec(0..30usize, 1..15),
    ) {
        let mut store = EntityStore::new();
        let a = store.intern("a");

        let mut alive: Vec<EntityId> = (0..count)
            .map(|i| {
                let e = store.new_entity().unwrap();
                store.set_component(e, a, i as u64).unwrap();
                e
            })
            .collect();

        for &v in &victims {
            if alive.is_empty() {
                break;
            }
            let e = alive.remove(v % alive.len());
            store.delete_entity(e).unwrap();
            prop_assert!(store.location(e).is_err());
        }

        for &e in &alive {
            let loc = store.location(e).unwrap();
            let handle = store.archetype_at(loc.archetype).unwrap();
            prop_assert_eq!(handle.entity_at(loc.row), e);
            prop_assert!(store.get_component::<u64>(e, a).unwrap().is_some());
        }
    }
}
