//! Integration tests for query-time and emptying-time piggybacking.

use rr_tree::{BoundingBox, LoggingObjectTracer, ObjectTracer, RRTree, TracePhase};
use rr_tree_int_test::test_util::{
    cleanup, create_test_context, object, random_path, run_test, small_config, sorted_ids,
};

#[ctor::ctor]
fn init() {
    colog::init();
}

const EVERYWHERE: BoundingBox = BoundingBox {
    min_x: -1.0e6,
    min_y: -1.0e6,
    max_x: 1.0e6,
    max_y: 1.0e6,
};

fn grid_position(id: u64) -> (f64, f64) {
    ((id % 10) as f64 * 4.0, (id / 10) as f64 * 4.0)
}

#[test]
fn test_query_moves_operations_out_of_buffer() {
    run_test(
        || create_test_context(small_config()),
        |ctx| {
            let tree = ctx.tree();
            for id in 0..60 {
                let (x, y) = grid_position(id);
                tree.insert(object(id, x, y))?;
            }
            tree.forced_empty_buffer()?;

            // New objects on top of stored ones, so they fit the same leaves
            for id in 100..110 {
                let (x, y) = grid_position(id - 100);
                tree.insert(object(id, x, y))?;
            }
            for id in (0..20).step_by(4) {
                let (x, y) = grid_position(id);
                tree.remove(object(id, x, y))?;
            }

            let buffered_before = tree.buffer().len() as u64;
            let piggybacked_before = tree.stats().query_piggybackings.total();
            let hits = tree.query(&EVERYWHERE)?;
            let piggybacked = tree.stats().query_piggybackings.total() - piggybacked_before;

            let mut expected: Vec<u64> = (0..60).filter(|id| id >= &20 || id % 4 != 0).collect();
            expected.extend(100..110);
            assert_eq!(sorted_ids(&hits), expected);
            assert!(piggybacked > 0);
            assert_eq!(buffered_before - tree.buffer().len() as u64, piggybacked);
            assert_eq!(tree.size(), expected.len() as u64);
            tree.check_invariants()?;
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_query_without_piggybacking_keeps_buffer() {
    run_test(
        || create_test_context(small_config().with_query_piggybacking(false)),
        |ctx| {
            let tree = ctx.tree();
            for id in 0..40 {
                let (x, y) = grid_position(id);
                tree.insert(object(id, x, y))?;
            }
            tree.forced_empty_buffer()?;
            for id in 40..45 {
                let (x, y) = grid_position(id - 40);
                tree.insert(object(id, x + 0.5, y + 0.5))?;
            }
            tree.remove(object(7, 28.0, 0.0))?;

            let hits = tree.query(&BoundingBox::new(0.0, 0.0, 30.0, 1.0))?;
            assert_eq!(sorted_ids(&hits), vec![0, 1, 2, 3, 4, 5, 6, 40, 41, 42, 43, 44]);
            assert_eq!(tree.buffer().len(), 6);
            assert_eq!(tree.stats().query_piggybackings.total(), 0);
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_deletion_applied_on_visited_root_leaf() {
    run_test(
        || create_test_context(small_config()),
        |ctx| {
            let tree = ctx.tree();
            for id in 0..4 {
                tree.insert(object(id, id as f64 * 2.0, id as f64 * 2.0))?;
            }
            tree.forced_empty_buffer()?;
            tree.remove(object(2, 4.0, 4.0))?;

            let hits = tree.query(&BoundingBox::new(3.5, 3.5, 5.5, 5.5))?;
            assert!(hits.is_empty());
            assert!(tree.buffer().is_empty());
            assert_eq!(tree.stats().query_piggybackings.deletions(), 1);
            assert_eq!(tree.disk_stats().total_entries, 3);
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_emptying_piggybacking_with_epsilon() {
    for epsilon in [0.0, 0.5] {
        run_test(
            || {
                create_test_context(
                    small_config()
                        .with_piggybacking_epsilon(epsilon)
                        .with_query_piggybacking(false),
                )
            },
            |ctx| {
                let tree = ctx.tree();
                for id in 0..120 {
                    // two interleaved clusters
                    let base = if id % 2 == 0 { 0.0 } else { 100.0 };
                    let offset = (id / 2) as f64;
                    tree.insert(object(id, base + offset % 12.0, base + offset / 12.0))?;
                }
                tree.check_invariants()?;

                let stats = tree.stats();
                assert!(stats.empty_buffers > 0);
                let piggybacked = stats.leaf_update_piggybackings.total()
                    + stats.nonleaf_update_piggybackings.total();
                log::info!("epsilon {}: {} operations piggybacked", epsilon, piggybacked);

                let hits = tree.query(&EVERYWHERE)?;
                assert_eq!(sorted_ids(&hits), (0..120).collect::<Vec<_>>());
                Ok(())
            },
            cleanup,
        );
    }
}

#[test]
fn test_traced_object_is_piggybacked() {
    let path = random_path();
    let mut tracer = LoggingObjectTracer::new();
    tracer.register_object(9);
    let mut tree = RRTree::with_tracer(&path, small_config(), tracer).unwrap();

    for id in 0..4 {
        tree.insert(object(id, id as f64 * 2.0, id as f64 * 2.0)).unwrap();
    }
    tree.forced_empty_buffer().unwrap();
    tree.insert(object(9, 3.0, 3.0)).unwrap();
    let hits = tree.query(&BoundingBox::new(3.2, 3.2, 3.8, 3.8)).unwrap();
    assert_eq!(sorted_ids(&hits), vec![9]);

    let phases = tree.tracer().phases_of(9);
    assert_eq!(
        phases,
        vec![
            TracePhase::InsertToBuffer,
            TracePhase::LeafNodePiggybacking,
            TracePhase::CompleteOperation,
            TracePhase::DataTreeQueryFirstLoop,
            TracePhase::DataTreeQueryFinalLoop,
        ]
    );

    tree.close().unwrap();
    drop(tree);
    std::fs::remove_file(&path).unwrap();
}
