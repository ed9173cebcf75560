//! Random structural edits against a real store keep positions `1..N` and
//! agree with a plain ordered list.

use std::sync::Arc;

use hudson_core::{is_contiguous, InMemoryCatalog, ItemId, MembershipAttrs, MembershipId};
use hudson_live::{LiveConfig, LiveService, StoreConfig};
use proptest::prelude::*;
use proptest::test_runner::Config;

#[derive(Debug, Clone)]
enum Op {
    Append,
    InsertAt(usize),
    Remove(usize),
    Reorder(Vec<u16>),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Append),
        2 => (0_usize..16).prop_map(Op::InsertAt),
        2 => (0_usize..16).prop_map(Op::Remove),
        1 => proptest::collection::vec(any::<u16>(), 16).prop_map(Op::Reorder),
    ]
}

proptest! {
    #![proptest_config(Config::with_cases(24))]
    #[test]
    fn store_positions_match_model(ops in proptest::collection::vec(op_strategy(), 1..24)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let service = LiveService::open(
                StoreConfig::for_testing(dir.path().join("db")),
                Arc::new(InMemoryCatalog::new()),
                LiveConfig::default(),
            )
            .unwrap();
            let tenant = hudson_core::TenantId::new();
            let set = service.sets().create_set(tenant, "Prop", "prop", None).await.unwrap();
            let positions = service.positions();

            // Expected order of membership ids
            let mut model: Vec<MembershipId> = Vec::new();

            for op in ops {
                match op {
                    Op::Append => {
                        let m = positions
                            .add(tenant, set.id, ItemId::new(), MembershipAttrs::default(), None)
                            .await
                            .unwrap();
                        model.push(m.id);
                    }
                    Op::InsertAt(raw) => {
                        let index = raw % (model.len() + 1);
                        let m = positions
                            .insert_at(tenant, set.id, index as u32 + 1, ItemId::new(), MembershipAttrs::default())
                            .await
                            .unwrap();
                        model.insert(index, m.id);
                    }
                    Op::Remove(raw) => {
                        if model.is_empty() {
                            continue;
                        }
                        let id = model.remove(raw % model.len());
                        positions.remove(tenant, id).await.unwrap();
                    }
                    Op::Reorder(keys) => {
                        if model.is_empty() {
                            continue;
                        }
                        let mut order: Vec<usize> = (0..model.len()).collect();
                        order.sort_by_key(|i| (keys[i % keys.len()], *i));
                        let target: Vec<MembershipId> = order.iter().map(|i| model[*i]).collect();
                        positions.reorder(tenant, set.id, &target).await.unwrap();
                        model = target;
                    }
                }

                let rows = service.list_memberships(tenant, set.id).unwrap();
                let got: Vec<MembershipId> = rows.iter().map(|m| m.id).collect();
                let ranks: Vec<u32> = rows.iter().map(|m| m.position).collect();
                prop_assert!(is_contiguous(&ranks), "positions {:?}", ranks);
                prop_assert_eq!(&got, &model);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
