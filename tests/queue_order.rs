use std::collections::BTreeSet;

use proptest::prelude::*;
use runpool::errors::RunpoolError;
use runpool::task::TaskQueue;

fn entries_strategy() -> impl Strategy<Value = Vec<(Option<i64>, u64)>> {
    // Unique uids with a small priority range so ties are common.
    proptest::collection::btree_set(0u64..500, 0..40).prop_flat_map(|uids| {
        let uids: Vec<u64> = uids.into_iter().collect();
        let n = uids.len();
        proptest::collection::vec(proptest::option::of(-3i64..3), n)
            .prop_map(move |prios| prios.into_iter().zip(uids.clone()).collect())
    })
}

proptest! {
    #[test]
    fn dequeue_order_is_priority_then_uid(entries in entries_strategy()) {
        let mut queue = TaskQueue::new();
        for &(priority, uid) in &entries {
            queue.enqueue(priority, uid).unwrap();
        }
        prop_assert_eq!(queue.len(), entries.len());

        let mut expected = entries.clone();
        expected.sort_by_key(|&(p, uid)| (p.is_none(), p.unwrap_or(0), uid));

        let mut actual = Vec::new();
        while !queue.is_empty() {
            let entry = queue.dequeue_highest_priority().unwrap();
            actual.push((entry.priority, entry.uid));
        }
        prop_assert_eq!(actual, expected);
        prop_assert!(matches!(queue.dequeue_highest_priority(), Err(RunpoolError::QueueEmpty)));
    }

    #[test]
    fn a_uid_is_never_queued_twice(uids in proptest::collection::vec(0u64..20, 1..60)) {
        let mut queue = TaskQueue::new();
        let mut seen = BTreeSet::new();
        for uid in uids {
            let res = queue.enqueue(None, uid);
            if seen.insert(uid) {
                prop_assert!(res.is_ok());
            } else {
                prop_assert!(matches!(res, Err(RunpoolError::DuplicateUid(u)) if u == uid));
            }
        }
        prop_assert_eq!(queue.len(), seen.len());
    }
}
