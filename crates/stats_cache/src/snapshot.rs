//! Immutable per-target queue counts

use std::collections::HashMap;

use contracts::{ObjType, QueueCountRow, TargetId};
use serde::Serialize;

type CountsByType = HashMap<ObjType, u64>;

/// Queue counts grouped by target and object type
///
/// Built once per refresh and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    delayed: HashMap<TargetId, CountsByType>,
    pending: HashMap<TargetId, CountsByType>,
    generation: u64,
}

impl StatsSnapshot {
    /// Group query rows, dropping terminal actions
    pub fn from_rows(rows: &[QueueCountRow], generation: u64) -> Self {
        let mut snapshot = Self {
            generation,
            ..Self::default()
        };
        for row in rows.iter().filter(|row| !row.action.is_terminal()) {
            let map = if row.delayed {
                &mut snapshot.delayed
            } else {
                &mut snapshot.pending
            };
            *map.entry(row.target.clone())
                .or_default()
                .entry(row.obj_type)
                .or_default() += row.count;
        }
        snapshot
    }

    pub fn count(&self, target: &str, obj_type: ObjType, delayed: bool) -> u64 {
        let map = if delayed { &self.delayed } else { &self.pending };
        map.get(target)
            .and_then(|by_type| by_type.get(&obj_type))
            .copied()
            .unwrap_or(0)
    }

    /// Refresh sequence number; 0 until the first successful refresh
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetId> {
        let mut targets: Vec<_> = self.delayed.keys().chain(self.pending.keys()).collect();
        targets.sort();
        targets.dedup();
        targets.into_iter()
    }

    pub fn is_empty(&self) -> bool {
        self.delayed.is_empty() && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::QueueAction;

    fn row(target: &str, action: QueueAction, delayed: bool, count: u64) -> QueueCountRow {
        QueueCountRow {
            target: TargetId::from(target),
            obj_type: ObjType::PAGE,
            action,
            delayed,
            count,
        }
    }

    #[test]
    fn test_terminal_actions_are_excluded() {
        let rows = vec![
            row("node-1", QueueAction::Create, false, 5),
            row("node-1", QueueAction::Modify, false, 3),
            row("node-1", QueueAction::Delete, false, 100),
            row("node-1", QueueAction::Offline, true, 100),
            row("node-1", QueueAction::Move, true, 2),
        ];
        let snapshot = StatsSnapshot::from_rows(&rows, 1);

        assert_eq!(snapshot.count("node-1", ObjType::PAGE, false), 8);
        assert_eq!(snapshot.count("node-1", ObjType::PAGE, true), 2);
        assert_eq!(snapshot.count("node-1", ObjType::FILE, false), 0);
        assert_eq!(snapshot.count("node-2", ObjType::PAGE, false), 0);
    }

    #[test]
    fn test_targets_listed_once() {
        let rows = vec![
            row("node-2", QueueAction::Create, true, 1),
            row("node-1", QueueAction::Create, false, 1),
            row("node-1", QueueAction::Create, true, 1),
        ];
        let snapshot = StatsSnapshot::from_rows(&rows, 1);
        let targets: Vec<_> = snapshot.targets().map(|t| t.as_str()).collect();
        assert_eq!(targets, vec!["node-1", "node-2"]);
    }

    #[test]
    fn test_only_terminal_rows_give_empty_snapshot() {
        let snapshot = StatsSnapshot::from_rows(&[row("node-1", QueueAction::Hide, false, 4)], 7);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.generation(), 7);
    }
}
