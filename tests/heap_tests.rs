use deferq::tree::{LeafStore, OctonaryHeap};
use proptest::prelude::*;

fn heap_from(values: &[u64]) -> OctonaryHeap {
    let mut heap = OctonaryHeap::new();
    for &v in values {
        heap.insert(v);
    }
    heap
}

fn assert_heap_property(heap: &OctonaryHeap) {
    let values = heap.as_slice();
    for i in 1..values.len() {
        let parent = (i - 1) / 8;
        assert!(
            values[parent] <= values[i],
            "heap property broken at {i}: parent {} > child {}",
            values[parent],
            values[i]
        );
    }
}

#[test]
fn range_query_returns_values_in_window() {
    let heap = heap_from(&[5, 3, 8, 1, 9, 2, 7, 4, 6]);

    let mut result = heap.range_query(3, 7);
    result.sort_unstable();

    assert_eq!(result, vec![3, 4, 5, 6, 7]);
    // query must not consume anything
    assert_eq!(heap.len(), 9);
}

#[test]
fn pop_range_query_removes_exactly_the_window() {
    let mut heap = heap_from(&[5, 3, 8, 1, 9, 2, 7, 4, 6]);

    let mut popped = heap.pop_range_query(3, 7);
    popped.sort_unstable();
    assert_eq!(popped, vec![3, 4, 5, 6, 7]);

    let mut rest = heap.range_query(0, 10);
    rest.sort_unstable();
    assert_eq!(rest, vec![1, 2, 8, 9]);

    assert_heap_property(&heap);
}

#[test]
fn min_and_pop_drain_in_ascending_order() {
    let mut heap = heap_from(&[41, 7, 23, 7, 100, 0]);

    let mut drained = Vec::new();
    while let Some(min) = heap.min() {
        assert_eq!(heap.pop(), Some(min));
        drained.push(min);
    }

    assert_eq!(drained, vec![0, 7, 7, 23, 41, 100]);
    assert_eq!(heap.pop(), None);
}

#[test]
fn duplicates_are_distinct_entries() {
    let mut heap = heap_from(&[5, 5, 5, 5, 5]);
    assert_eq!(heap.len(), 5);

    let popped = heap.pop_range_query(5, 5);
    assert_eq!(popped, vec![5, 5, 5, 5, 5]);
    assert!(heap.is_empty());
}

#[test]
fn empty_heap_queries_are_empty() {
    let mut heap = OctonaryHeap::new();
    assert!(heap.range_query(0, u64::MAX).is_empty());
    assert!(heap.pop_range_query(0, u64::MAX).is_empty());
    assert_eq!(heap.min(), None);
}

#[test]
fn split_partitions_disjoint_halves() {
    let mut heap = heap_from(&[9, 1, 8, 2, 7, 3, 6, 4, 5, 0]);

    let (right, split_key) = heap.split();

    let mut left_values = heap.range_query(0, u64::MAX);
    let mut right_values = right.range_query(0, u64::MAX);
    left_values.sort_unstable();
    right_values.sort_unstable();

    assert_eq!(left_values, vec![0, 1, 2, 3, 4]);
    assert_eq!(right_values, vec![5, 6, 7, 8, 9]);
    // the split key is the max of the left half
    assert_eq!(split_key, 4);

    assert_heap_property(&heap);
    assert_heap_property(&right);
}

#[test]
fn split_with_duplicate_values() {
    let mut heap = heap_from(&[5; 6]);

    let (right, split_key) = heap.split();

    assert_eq!(split_key, 5);
    assert_eq!(heap.len(), 3);
    assert_eq!(right.len(), 3);
}

proptest! {
    #[test]
    fn pop_range_matches_filter(
        values in prop::collection::vec(0u64..1000, 0..200),
        a in 0u64..1000,
        b in 0u64..1000,
    ) {
        let (lo, hi) = (a.min(b), a.max(b));
        let mut heap = heap_from(&values);

        let mut popped = heap.pop_range_query(lo, hi);
        popped.sort_unstable();

        let mut expected: Vec<u64> =
            values.iter().copied().filter(|&v| v >= lo && v <= hi).collect();
        expected.sort_unstable();
        prop_assert_eq!(popped, expected);

        let mut rest = heap.range_query(0, u64::MAX);
        rest.sort_unstable();
        let mut expected_rest: Vec<u64> =
            values.iter().copied().filter(|&v| v < lo || v > hi).collect();
        expected_rest.sort_unstable();
        prop_assert_eq!(rest, expected_rest);

        assert_heap_property(&heap);
    }

    #[test]
    fn inserts_keep_heap_property(values in prop::collection::vec(any::<u64>(), 0..200)) {
        let heap = heap_from(&values);
        assert_heap_property(&heap);
        prop_assert_eq!(heap.len(), values.len());
    }
}
