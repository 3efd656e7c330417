//! 按修订日志的真实读取顺序（新到旧）构建账本，验证推进方向。

use std::collections::HashSet;

use wporg_mirror::sync::ledger::MemorySink;
use wporg_mirror::sync::{CheckpointLedger, ScanDirection, SyncPlan};

/// r30 改了 c，r20 改了 b，r10 改了 a 和 shared；r30 也改了 shared。
fn revision_log() -> SyncPlan {
    serde_yaml::from_str(
        r#"
revisions:
  - number: 30
    items: [c, shared]
  - number: 20
    items: [b]
  - number: 10
    items: [a, shared]
"#,
    )
    .unwrap()
}

fn ledger(direction: ScanDirection) -> CheckpointLedger<MemorySink> {
    CheckpointLedger::from_plan(&revision_log(), direction, 5, MemorySink::default())
}

#[test]
fn last_added_scans_from_oldest_revision() {
    let mut l = ledger(ScanDirection::LastAdded);
    assert_eq!(l.head().map(|c| c.number), Some(10));

    assert_eq!(l.resolve("c").unwrap(), None);
    assert_eq!(l.resolve("shared").unwrap(), None);
    assert_eq!(l.resolve("a").unwrap(), Some(10));
    assert_eq!(l.resolve("b").unwrap(), Some(30));
    assert_eq!(l.sink().persisted, vec![10, 30]);
}

#[test]
fn first_added_would_skip_older_pending_revisions() {
    let mut l = ledger(ScanDirection::FirstAdded);
    assert_eq!(l.head().map(|c| c.number), Some(30));

    l.resolve("c").unwrap();
    // r10 和 r20 仍有未完成条目，水位线却已经跳到 r30
    assert_eq!(l.resolve("shared").unwrap(), Some(30));
    assert!(l.is_blocking("b"));
}

fn permutations(items: &[&'static str]) -> Vec<Vec<&'static str>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let first = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, first);
            out.push(tail);
        }
    }
    out
}

/// 所有不晚于它的修订都已完成的最大修订号。
fn low_water_mark(plan: &SyncPlan, resolved: &HashSet<&str>, floor: u64) -> u64 {
    let mut revisions: Vec<_> = plan.revisions.iter().collect();
    revisions.sort_by_key(|r| r.number);
    let mut mark = floor;
    for rev in revisions {
        if !rev.items.iter().all(|i| resolved.contains(i.as_str())) {
            break;
        }
        mark = mark.max(rev.number);
    }
    mark
}

#[test]
fn last_added_tracks_low_water_mark_for_every_resolution_order() {
    let plan = revision_log();
    for order in permutations(&["a", "b", "c", "shared"]) {
        let mut l = ledger(ScanDirection::LastAdded);
        let mut resolved = HashSet::new();
        for slug in &order {
            resolved.insert(*slug);
            l.resolve(slug).unwrap();
            assert_eq!(
                l.watermark(),
                low_water_mark(&plan, &resolved, 5),
                "order {order:?}, after {slug}"
            );
        }
        assert_eq!(l.watermark(), 30);
        assert_eq!(l.remaining(), 0);

        let persisted = &l.sink().persisted;
        assert!(persisted.windows(2).all(|w| w[0] < w[1]), "{persisted:?}");
    }
}
