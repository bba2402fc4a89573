//! Property tests for the invariants listed in spec §8, items 1-5 (item 6,
//! "no value anywhere equals the absent marker", holds by construction since
//! `Value` has no nil variant — see DESIGN.md).

use proptest::prelude::*;

use entigraph::schema::IndexKind;
use entigraph::tx::{FormValue, MapForm, TxForm};
use entigraph::{create, AttrName, AttrSchema, Db, Schema, Value};

fn prop_schema() -> Schema {
    Schema::build([
        (
            AttrName::new("key"),
            AttrSchema::default().unique_identity(),
        ),
        (
            AttrName::new("val"),
            AttrSchema::default().indexed(IndexKind::Hash),
        ),
        (
            AttrName::new("tag"),
            AttrSchema::default()
                .many()
                .indexed(IndexKind::Hash),
        ),
    ])
    .unwrap()
}

/// Every (identifier, entity) pair's self-identifier equals its key (spec §8
/// item 1), and every entity's attributes fully agree with AVE (items 2-3),
/// and every unique attribute value resolves to at most one entity (item 4).
fn check_invariants(db: &Db) {
    for (id, entity) in db.eav().iter() {
        assert_eq!(entity.id(), id, "EAV self-identifier must match its key");
        for (attr, attr_value) in entity.iter() {
            if !db.schema().is_indexed(attr) {
                continue;
            }
            for v in attr_value.values() {
                let backed = if db.schema().is_single_shape(attr) {
                    db.ave().get_single(attr, v) == Some(id)
                } else {
                    db.ave()
                        .get_multi(attr, v)
                        .is_some_and(|set| set.contains(id))
                };
                assert!(backed, "indexed binding ({attr}, {v:?}) on {id} missing from AVE");
            }
        }
    }

    for attr in db.schema().indexed_attrs() {
        let Some(slot) = db.ave().slot(attr) else {
            continue;
        };
        for (v, id) in slot.iter_pairs() {
            let entity = db
                .eav()
                .get(&id)
                .unwrap_or_else(|| panic!("AVE entry ({attr}, {v:?}) -> {id} has no EAV entity"));
            assert!(
                entity.contains(attr, v),
                "AVE entry ({attr}, {v:?}) -> {id} not reflected back in EAV"
            );
        }
    }

    for attr in [AttrName::new("key")] {
        let Some(slot) = db.ave().slot(&attr) else {
            continue;
        };
        let mut seen = std::collections::HashSet::new();
        for v in slot.iter_values() {
            assert!(seen.insert(v.clone()), "unique attribute {attr} has a duplicate AVE key");
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    SetKeyVal(u8, u8, i64),
    AddTag(u8, u8, i64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4, 0u8..3, -5i64..5).prop_map(|(e, k, v)| Op::SetKeyVal(e, k, v)),
        (0u8..4, 0u8..3, -5i64..5).prop_map(|(e, k, v)| Op::AddTag(e, k, v)),
    ]
}

fn op_to_tx(op: &Op) -> Vec<TxForm> {
    match op {
        Op::SetKeyVal(_e, k, v) => vec![TxForm::AssertMap(
            MapForm::new()
                .set("key", Value::from(*k as i64))
                .set("val", Value::from(*v)),
        )],
        Op::AddTag(_e, k, v) => vec![TxForm::AssertMap(
            MapForm::new()
                .set("key", Value::from(*k as i64))
                .set_many("tag", [FormValue::Val(Value::from(*v))]),
        )],
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn invariants_hold_after_any_legal_transaction_sequence(ops in prop::collection::vec(arb_op(), 0..40)) {
        let mut db = create(prop_schema());
        for op in &ops {
            let forms = op_to_tx(op);
            // Every op is its own transaction and carries exactly one
            // assertion per attribute, and `key` is upsert-resolved
            // (unique-identity), so repeated `k` values always land on the
            // same entity rather than racing two entities for one `key`
            // value. Nothing here should ever be rejected; a failure means a
            // real regression in the transactor, not an expected conflict.
            match db.transact(forms) {
                Ok(report) => db = report.after,
                Err(e) => panic!("unexpected transaction failure for {op:?}: {e}"),
            }
            check_invariants(&db);
        }
    }
}
