//! Concurrent callers sharing one graph
//!
//! Top-level activations are serialized, so every thread observes exactly
//! the values it supplied and the graph ends inactive. A call made on a
//! thread that is already running one joins it.

use std::thread;

use caskade_core::{ActivationContext, GraphError, Payload};
use caskade_test_utils::{assert_graph_inactive, ScenarioGraph};

#[test]
fn test_threads_observe_their_own_payloads() {
    let graph = ScenarioGraph::new().unwrap();
    let f = graph.sum();

    thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let f = f.clone();
                s.spawn(move || {
                    let mut results = Vec::new();
                    for j in 0..25 {
                        let x = (i * 100 + j) as f64;
                        results.push((x, f.call((), Payload::list([x, 1.0])).unwrap()));
                    }
                    results
                })
            })
            .collect();

        for handle in handles {
            for (x, result) in handle.join().unwrap() {
                assert_eq!(result, x + 1.0 + 2.0);
            }
        }
    });

    assert_graph_inactive(&graph.module).unwrap();
}

#[test]
fn test_same_thread_reentry_joins_the_running_call() {
    let graph = ScenarioGraph::new().unwrap();
    let ctx = ActivationContext::enter(&graph.module, Payload::list([1.0, 2.0])).unwrap();

    // x = 1, y = 2, k = 2
    assert_eq!(graph.sum().call((), Payload::None).unwrap(), 5.0);

    let err = graph.sum().call((), Payload::list([1.0, 2.0])).unwrap_err();
    assert!(matches!(err, GraphError::Payload(_)));

    // the outer activation is unaffected
    assert_eq!(ctx.scope().get("x").unwrap().sum(), 1.0);
    assert!(graph.module.is_active());
    drop(ctx);
    assert_graph_inactive(&graph.module).unwrap();
    assert_eq!(graph.sum().call((), Payload::list([3.0, 2.0])).unwrap(), 7.0);
}
