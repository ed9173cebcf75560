use std::collections::HashMap;

use hudson_core::{
    is_contiguous, next_position, renumber_plan, reorder_plan, shift_up_plan, MembershipId,
    Position, PositionMove,
};
use proptest::prelude::*;
use proptest::test_runner::Config;

#[derive(Debug, Clone)]
enum Op {
    Append,
    InsertAt(usize),
    Remove(usize),
    Reorder(Vec<usize>),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Append),
        (0_usize..32).prop_map(Op::InsertAt),
        (0_usize..32).prop_map(Op::Remove),
        proptest::collection::vec(any::<usize>(), 0..32).prop_map(Op::Reorder),
    ]
}

/// Table that refuses to let two rows share a position at any step.
#[derive(Default)]
struct StrictTable {
    rows: HashMap<MembershipId, Position>,
}

impl StrictTable {
    fn apply(&mut self, mv: &PositionMove) -> Result<(), TestCaseError> {
        let collision = self
            .rows
            .iter()
            .any(|(id, pos)| *pos == mv.to && *id != mv.membership_id);
        prop_assert!(!collision, "position {} collided", mv.to);
        self.rows.insert(mv.membership_id, mv.to);
        Ok(())
    }

    fn snapshot(&self) -> Vec<(MembershipId, Position)> {
        let mut rows: Vec<_> = self.rows.iter().map(|(id, pos)| (*id, *pos)).collect();
        rows.sort_by_key(|(_, pos)| *pos);
        rows
    }

    fn positions(&self) -> Vec<Position> {
        self.rows.values().copied().collect()
    }
}

proptest! {
    #![proptest_config(Config::with_cases(128))]
    #[test]
    fn positions_stay_contiguous(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut table = StrictTable::default();

        for op in ops {
            match op {
                Op::Append => {
                    let pos = next_position(&table.positions());
                    table.rows.insert(MembershipId::new(), pos);
                }
                Op::InsertAt(raw) => {
                    let at = (raw % (table.rows.len() + 1)) as Position + 1;
                    let plan = shift_up_plan(&table.snapshot(), at);
                    for mv in plan.moves() {
                        table.apply(mv)?;
                    }
                    let id = MembershipId::new();
                    table.apply(&PositionMove { membership_id: id, from: 0, to: at })?;
                }
                Op::Remove(raw) => {
                    if table.rows.is_empty() {
                        continue;
                    }
                    let victim = table.snapshot()[raw % table.rows.len()].0;
                    table.rows.remove(&victim);
                    for mv in renumber_plan(&table.snapshot()) {
                        table.apply(&mv)?;
                    }
                }
                Op::Reorder(keys) => {
                    let mut ids: Vec<MembershipId> =
                        table.snapshot().into_iter().map(|(id, _)| id).collect();
                    // Deterministic shuffle driven by the generated keys
                    for (i, key) in keys.iter().enumerate() {
                        if ids.len() > 1 {
                            let a = i % ids.len();
                            let b = key % ids.len();
                            ids.swap(a, b);
                        }
                    }
                    let plan = reorder_plan(&table.snapshot(), &ids).unwrap();
                    for mv in plan.moves() {
                        table.apply(mv)?;
                    }
                    for (idx, id) in ids.iter().enumerate() {
                        prop_assert_eq!(table.rows[id], idx as Position + 1);
                    }
                }
            }
            prop_assert!(is_contiguous(&table.positions()));
        }
    }
}
