//! Position plans for ordered memberships.
//!
//! Within one set, positions are unique and form `1..N`. A store enforcing
//! that uniqueness on every write would reject a naive in-place swap, so
//! bulk moves are expressed as a [`TwoPhasePlan`]: stage every affected row
//! into a disjoint temporary range, then move it to its final slot.
//!
//! The plans are pure. The store executes them inside one transaction.

use std::collections::{HashMap, HashSet};

use crate::error::{LiveError, LiveResult};
use crate::ids::MembershipId;
use crate::model::Position;

/// Lowest slot of the staging range. A set whose positions already reach it
/// stages above its current maximum instead.
pub const TEMP_POSITION_OFFSET: Position = 1_000_000;

/// Move one membership from one position to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionMove {
    pub membership_id: MembershipId,
    pub from: Position,
    pub to: Position,
}

/// Staging moves followed by finalizing moves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TwoPhasePlan {
    pub staging: Vec<PositionMove>,
    pub finalize: Vec<PositionMove>,
}

impl TwoPhasePlan {
    pub fn is_empty(&self) -> bool {
        self.finalize.is_empty()
    }

    /// Number of rows the plan touches.
    pub fn len(&self) -> usize {
        self.finalize.len()
    }

    /// All moves in execution order.
    pub fn moves(&self) -> impl Iterator<Item = &PositionMove> {
        self.staging.iter().chain(self.finalize.iter())
    }
}

/// First staging slot for `current`: above every occupied position.
pub fn staging_base(current: &[(MembershipId, Position)]) -> Position {
    let highest = current.iter().map(|(_, pos)| *pos).max().unwrap_or(0);
    TEMP_POSITION_OFFSET.max(highest.saturating_add(1))
}

/// Next free position after the current ones.
pub fn next_position(current: &[Position]) -> Position {
    current.iter().copied().max().unwrap_or(0) + 1
}

/// `true` when the positions are exactly `{1, ..., N}`.
pub fn is_contiguous(positions: &[Position]) -> bool {
    let mut sorted = positions.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .enumerate()
        .all(|(idx, pos)| *pos == idx as Position + 1)
}

/// Check that `ordered` is a full permutation of `current`.
///
/// Duplicates are reported before foreign or missing ids.
pub fn validate_reorder(current: &[MembershipId], ordered: &[MembershipId]) -> LiveResult<()> {
    let mut seen = HashSet::with_capacity(ordered.len());
    for id in ordered {
        if !seen.insert(*id) {
            return Err(LiveError::DuplicateIds(id.to_string()));
        }
    }

    let owned: HashSet<&MembershipId> = current.iter().collect();
    if let Some(foreign) = ordered.iter().find(|id| !owned.contains(id)) {
        return Err(LiveError::OwnershipMismatch(format!(
            "membership {foreign} does not belong to this set"
        )));
    }

    if ordered.len() != current.len() {
        return Err(LiveError::OwnershipMismatch(format!(
            "reorder lists {} of {} memberships",
            ordered.len(),
            current.len()
        )));
    }

    Ok(())
}

/// Plan a full reorder so `ordered[i]` ends at position `i + 1`.
///
/// Rows already at their final position are left out. Staging slot for a
/// row is `staging_base + index in the new order`, which is unique.
pub fn reorder_plan(
    current: &[(MembershipId, Position)],
    ordered: &[MembershipId],
) -> LiveResult<TwoPhasePlan> {
    let ids: Vec<MembershipId> = current.iter().map(|(id, _)| *id).collect();
    validate_reorder(&ids, ordered)?;

    let from_by_id: HashMap<MembershipId, Position> = current.iter().copied().collect();
    let base = staging_base(current);
    let mut plan = TwoPhasePlan::default();
    for (idx, id) in ordered.iter().enumerate() {
        let from = from_by_id.get(id).copied().unwrap_or_default();
        let to = idx as Position + 1;
        if from == to {
            continue;
        }
        let temp = base + idx as Position;
        plan.staging.push(PositionMove { membership_id: *id, from, to: temp });
        plan.finalize.push(PositionMove { membership_id: *id, from: temp, to });
    }
    Ok(plan)
}

/// Plan opening a slot at `at` by shifting every row at or after it up by one.
pub fn shift_up_plan(current: &[(MembershipId, Position)], at: Position) -> TwoPhasePlan {
    let mut tail: Vec<(MembershipId, Position)> = current
        .iter()
        .copied()
        .filter(|(_, pos)| *pos >= at)
        .collect();
    tail.sort_by_key(|(_, pos)| *pos);

    let base = staging_base(current);
    let mut plan = TwoPhasePlan::default();
    for (idx, (id, pos)) in tail.into_iter().enumerate() {
        let temp = base + idx as Position;
        plan.staging.push(PositionMove { membership_id: id, from: pos, to: temp });
        plan.finalize.push(PositionMove { membership_id: id, from: temp, to: pos + 1 });
    }
    plan
}

/// Plan renumbering the whole set to `1..N` in ascending position order.
///
/// Every target is at or below its source and earlier rows have already
/// vacated theirs, so a single ascending pass never collides.
pub fn renumber_plan(current: &[(MembershipId, Position)]) -> Vec<PositionMove> {
    let mut rows = current.to_vec();
    rows.sort_by_key(|(_, pos)| *pos);
    rows.into_iter()
        .enumerate()
        .filter_map(|(idx, (id, pos))| {
            let to = idx as Position + 1;
            (pos != to).then_some(PositionMove { membership_id: id, from: pos, to })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<(MembershipId, Position)> {
        (0..n)
            .map(|i| (MembershipId::new(), i as Position + 1))
            .collect()
    }

    /// Apply moves against a table that rejects duplicate positions.
    fn apply_strict<'a>(
        table: &mut HashMap<MembershipId, Position>,
        moves: impl Iterator<Item = &'a PositionMove>,
    ) {
        for mv in moves {
            let taken = table
                .iter()
                .any(|(id, pos)| *pos == mv.to && *id != mv.membership_id);
            assert!(!taken, "position {} collided", mv.to);
            assert_eq!(table[&mv.membership_id], mv.from);
            table.insert(mv.membership_id, mv.to);
        }
    }

    #[test]
    fn test_next_position() {
        assert_eq!(next_position(&[]), 1);
        assert_eq!(next_position(&[1, 2, 3]), 4);
        assert_eq!(next_position(&[3, 1]), 4);
    }

    #[test]
    fn test_is_contiguous() {
        assert!(is_contiguous(&[]));
        assert!(is_contiguous(&[2, 1, 3]));
        assert!(!is_contiguous(&[1, 3]));
        assert!(!is_contiguous(&[1, 1, 2]));
        assert!(!is_contiguous(&[0, 1]));
    }

    #[test]
    fn test_reorder_plan_scenario() {
        // [A,B,C,D] -> [D,C,A,B]
        let current = rows(4);
        let (a, b, c, d) = (current[0].0, current[1].0, current[2].0, current[3].0);
        let plan = reorder_plan(&current, &[d, c, a, b]).unwrap();

        let mut table: HashMap<_, _> = current.iter().copied().collect();
        apply_strict(&mut table, plan.moves());

        assert_eq!(table[&d], 1);
        assert_eq!(table[&c], 2);
        assert_eq!(table[&a], 3);
        assert_eq!(table[&b], 4);
    }

    #[test]
    fn test_reorder_plan_skips_unmoved_rows() {
        let current = rows(3);
        let (a, b, c) = (current[0].0, current[1].0, current[2].0);
        let plan = reorder_plan(&current, &[a, c, b]).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.staging.iter().all(|mv| mv.to >= TEMP_POSITION_OFFSET));
    }

    #[test]
    fn test_staging_clears_positions_at_the_offset() {
        let a = MembershipId::new();
        let b = MembershipId::new();
        let c = MembershipId::new();
        let current = vec![(a, 1), (b, TEMP_POSITION_OFFSET), (c, TEMP_POSITION_OFFSET + 1)];
        assert_eq!(staging_base(&current), TEMP_POSITION_OFFSET + 2);
        assert_eq!(staging_base(&rows(3)), TEMP_POSITION_OFFSET);

        let mut table: HashMap<_, _> = current.iter().copied().collect();
        apply_strict(&mut table, shift_up_plan(&current, 1).moves());
        assert_eq!(table[&a], 2);
        assert_eq!(table[&b], TEMP_POSITION_OFFSET + 1);
        assert_eq!(table[&c], TEMP_POSITION_OFFSET + 2);

        let mut table: HashMap<_, _> = current.iter().copied().collect();
        apply_strict(&mut table, reorder_plan(&current, &[c, b, a]).unwrap().moves());
        assert_eq!((table[&c], table[&b], table[&a]), (1, 2, 3));
    }

    #[test]
    fn test_reorder_plan_large_set() {
        let current = rows(5_001);
        let reversed: Vec<_> = current.iter().rev().map(|(id, _)| *id).collect();
        let plan = reorder_plan(&current, &reversed).unwrap();
        // Middle row of an odd count stays put
        assert_eq!(plan.len(), 5_000);
        assert_eq!(plan.finalize[0].to, 1);
        assert_eq!(plan.finalize[0].from, TEMP_POSITION_OFFSET);
    }

    #[test]
    fn test_reorder_identity_is_empty() {
        let current = rows(3);
        let ids: Vec<_> = current.iter().map(|(id, _)| *id).collect();
        assert!(reorder_plan(&current, &ids).unwrap().is_empty());
    }

    #[test]
    fn test_reorder_rejects_duplicates_first() {
        let current = rows(2);
        let a = current[0].0;
        let foreign = MembershipId::new();
        let err = reorder_plan(&current, &[a, a, foreign]).unwrap_err();
        assert!(matches!(err, LiveError::DuplicateIds(_)));
    }

    #[test]
    fn test_reorder_rejects_foreign_id() {
        let current = rows(2);
        let err = reorder_plan(&current, &[current[0].0, MembershipId::new()]).unwrap_err();
        assert!(matches!(err, LiveError::OwnershipMismatch(_)));
    }

    #[test]
    fn test_reorder_rejects_partial_list() {
        let current = rows(3);
        let err = reorder_plan(&current, &[current[2].0]).unwrap_err();
        assert!(matches!(err, LiveError::OwnershipMismatch(_)));
    }

    #[test]
    fn test_shift_up_plan_opens_slot() {
        let current = rows(4);
        let plan = shift_up_plan(&current, 2);
        assert_eq!(plan.len(), 3);

        let mut table: HashMap<_, _> = current.iter().copied().collect();
        apply_strict(&mut table, plan.moves());

        let mut positions: Vec<_> = table.values().copied().collect();
        positions.sort_unstable();
        assert_eq!(positions, vec![1, 3, 4, 5]);
        assert_eq!(table[&current[1].0], 3);
    }

    #[test]
    fn test_shift_up_past_end_is_empty() {
        let current = rows(2);
        assert!(shift_up_plan(&current, 3).is_empty());
    }

    #[test]
    fn test_renumber_after_removal() {
        // [1,2,3,4,5] with 3 removed
        let all = rows(5);
        let remaining: Vec<_> = all.iter().copied().filter(|(_, p)| *p != 3).collect();
        let moves = renumber_plan(&remaining);

        let mut table: HashMap<_, _> = remaining.iter().copied().collect();
        apply_strict(&mut table, moves.iter());

        assert_eq!(table[&all[0].0], 1);
        assert_eq!(table[&all[1].0], 2);
        assert_eq!(table[&all[3].0], 3);
        assert_eq!(table[&all[4].0], 4);
    }

    #[test]
    fn test_renumber_contiguous_is_noop() {
        assert!(renumber_plan(&rows(4)).is_empty());
    }
}
