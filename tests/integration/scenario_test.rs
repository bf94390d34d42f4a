//! End-to-end call scenarios
//!
//! These tests drive whole graphs through `Forward` calls, the way an
//! application would, and check what each call observes and what the graph
//! remembers afterwards.

use std::panic::{self, AssertUnwindSafe};

use caskade_core::{
    Forward, GraphError, GraphResult, LinkValues, Module, Param, ParamState, Payload, Tensor,
};
use caskade_test_utils::{
    assert_graph_inactive, assert_param_state, init_test_logging, nested_graph, CountingResolver,
    ModuleBuilder, ScenarioGraph,
};

#[test]
fn test_sum_scenario_across_payload_kinds() {
    init_test_logging();
    let graph = ScenarioGraph::new().unwrap();
    let f = graph.sum();

    assert_eq!(f.call((), Payload::list([3.0, 4.0])).unwrap(), 9.0);
    assert_eq!(graph.x.last_value(), Some(Tensor::scalar(3.0)));

    assert_eq!(
        f.call((), Payload::mapping([("x", 1.0), ("y", 1.0)])).unwrap(),
        4.0
    );

    // a call that supplied x = 3.0, then x becomes static
    f.call((), Payload::list([3.0, 4.0])).unwrap();
    graph.x.to_static().unwrap();
    assert_param_state(&graph.module, "x", ParamState::Static).unwrap();
    assert_eq!(graph.module.flattener().paths(), vec!["y"]);

    assert_eq!(f.call((), Payload::list([4.0])).unwrap(), 9.0);
    assert_graph_inactive(&graph.module).unwrap();
}

#[test]
fn test_array_payload_drives_the_same_call() {
    let graph = ScenarioGraph::new().unwrap();
    let f = graph.sum();
    assert_eq!(f.call((), Payload::array(Tensor::vector([3.0, 4.0]))).unwrap(), 9.0);

    let err = f.call((), Payload::array(Tensor::vector([3.0]))).unwrap_err();
    assert!(matches!(err, GraphError::Payload(_)));
    assert!(!graph.module.is_active());
}

#[test]
fn test_pointer_value_is_scoped_to_the_call() {
    init_test_logging();
    let m: Module = Module::new("m");
    let q = m.add_param("q", Param::dynamic_with_shape("q", [])).unwrap();
    let p = m
        .add_param(
            "p",
            Param::pointer("p", &[("q", &q)], |links: &LinkValues<Tensor>| -> GraphResult<Tensor> {
                Ok(links.get("q")?.map(|v| v * 2.0))
            })
            .unwrap(),
        )
        .unwrap();

    let read_p = Forward::new(&m, "read_p", &["p"], |_, params, ()| {
        Ok::<_, GraphError>(params.get("p")?.clone())
    });
    assert_eq!(read_p.call((), Payload::list([5.0])).unwrap(), Tensor::scalar(10.0));

    // no cached value survives the call
    assert!(matches!(p.resolve_detached(), Err(GraphError::Unresolved(_))));
    assert_eq!(read_p.call((), Payload::list([1.0])).unwrap(), Tensor::scalar(2.0));
    assert_eq!(p.state(), ParamState::Pointer);
}

#[test]
fn test_pointer_evaluated_once_per_call() {
    let counter = CountingResolver::new();
    let m: Module = Module::new("m");
    let q = m.add_param("q", Param::dynamic("q")).unwrap();
    let p = m
        .add_param("p", Param::pointer("p", &[("q", &q)], counter.scaled("q", 3.0)).unwrap())
        .unwrap();
    m.add_param("r", Param::pointer("r", &[("p", &p)], counter.scaled("p", 1.0)).unwrap())
        .unwrap();

    let f = Forward::new(&m, "f", &["p", "r"], |scope, params, ()| {
        let mut total = params.get("p")?.sum() + params.get("r")?.sum();
        for _ in 0..5 {
            total += scope.get("p")?.sum();
        }
        Ok::<_, GraphError>(total)
    });

    assert_eq!(f.call((), Payload::list([1.0])).unwrap(), 21.0);
    // one evaluation of p, one of r
    assert_eq!(counter.count(), 2);

    counter.reset();
    assert_eq!(f.call((), Payload::list([2.0])).unwrap(), 42.0);
    assert_eq!(counter.count(), 2);
}

#[test]
fn test_no_leak_after_failed_call() {
    init_test_logging();
    let graph = ScenarioGraph::new().unwrap();
    let failing: Forward<Tensor, (), f64, GraphError> =
        Forward::new(&graph.module, "failing", &["x"], |_, _, ()| {
            Err(GraphError::Resolver("midway failure".to_string()))
        });

    assert!(failing.call((), Payload::list([7.0, 8.0])).is_err());
    assert_graph_inactive(&graph.module).unwrap();
    assert_eq!(graph.x.last_value(), None);

    // a subsequent call without values for x sees no stale transient value
    let read_x = Forward::new(&graph.module, "read_x", &[], |scope, _, ()| scope.get("x"));
    assert!(matches!(
        read_x.call((), Payload::mapping([("y", 1.0)])),
        Err(GraphError::Payload(_))
    ));
    assert_eq!(graph.sum().call((), Payload::list([1.0, 1.0])).unwrap(), 4.0);
}

#[test]
fn test_no_leak_after_panicking_call() {
    let graph = ScenarioGraph::new().unwrap();
    let panicking: Forward<Tensor, (), f64, GraphError> =
        Forward::new(&graph.module, "panicking", &["x"], |_, _, ()| panic!("user code panicked"));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        panicking.call((), Payload::list([1.0, 2.0]))
    }));
    assert!(outcome.is_err());
    assert_graph_inactive(&graph.module).unwrap();
    assert_eq!(graph.sum().call((), Payload::list([3.0, 4.0])).unwrap(), 9.0);
}

#[test]
fn test_nested_forward_calls_share_the_activation() {
    let main = nested_graph().unwrap();
    let m1 = main.module("m1").unwrap();
    let p0 = main.param("p0").unwrap();
    p0.to_dynamic().unwrap();

    let inner: Forward<Tensor, f64, f64, GraphError> =
        Forward::new(&m1, "inner", &["p1", "m2.p2"], |_, params, scale| {
            Ok(scale * (params.get("p1")?.sum() + params.get("m2.p2")?.sum()))
        });
    let outer = Forward::new(&main, "outer", &["p0"], move |scope, params, ()| {
        let nested = inner.call_in(scope, 10.0)?;
        Ok::<_, GraphError>(params.get("p0")?.sum() + nested)
    });

    assert_eq!(outer.call((), Payload::list([0.5])).unwrap(), 30.5);
    assert_graph_inactive(&main).unwrap();
}

#[test]
fn test_override_shadows_only_inside_its_scope() {
    let graph = ScenarioGraph::new().unwrap();
    let f = Forward::new(&graph.module, "f", &[], |scope, _, ()| {
        let shadowed = scope.with_override("k", 100.0, |s| s.get("k"))??;
        let restored = scope.get("k")?;
        Ok::<_, GraphError>((shadowed.sum(), restored.sum()))
    });

    assert_eq!(f.call((), Payload::list([0.0, 0.0])).unwrap(), (100.0, 2.0));
    assert_eq!(graph.k.value(), Some(Tensor::scalar(2.0)));
}

#[test]
fn test_forward_with_anyhow_errors() {
    let m = ModuleBuilder::new("m").dynamic("x").build().unwrap();
    let f: Forward<Tensor, (), f64, anyhow::Error> = Forward::new(&m, "checked", &["x"], |_, params, ()| {
        let x = params.get("x")?.sum();
        if x < 0.0 {
            anyhow::bail!("x must be non-negative, got {}", x);
        }
        Ok(x.sqrt())
    });

    assert_eq!(f.call((), Payload::list([9.0])).unwrap(), 3.0);

    let err = f.call((), Payload::list([-1.0])).unwrap_err();
    assert!(err.to_string().contains("non-negative"));

    let err = f.call((), Payload::list([1.0, 2.0])).unwrap_err();
    assert!(matches!(err.downcast_ref::<GraphError>(), Some(GraphError::Payload(_))));
    assert!(!m.is_active());
}

#[test]
fn test_cycle_rejection_leaves_links_unchanged() {
    let a: Param = Param::dynamic("a");
    let b = Param::alias_of("b", &a);
    let c = Param::alias_of("c", &b);

    assert!(matches!(a.link("c", &c), Err(GraphError::CyclicGraph(_))));
    assert!(a.links().is_empty());
    assert_eq!(b.links().len(), 1);
    assert_eq!(c.links().len(), 1);
    assert!(a.is_dynamic());
}

#[test]
fn test_unrelated_override_reuses_cached_pointer() {
    let counter = CountingResolver::new();
    let m: Module = Module::new("m");
    let q = m.add_param("q", Param::dynamic("q")).unwrap();
    m.add_param("k", Param::with_value("k", 1.0)).unwrap();
    m.add_param("p", Param::pointer("p", &[("q", &q)], counter.scaled("q", 1.0)).unwrap())
        .unwrap();

    let f = Forward::new(&m, "f", &[], |scope, _, ()| {
        let first = scope.get("p")?.sum();
        let shadowed = scope.with_override("k", 100.0, |s| s.get("p"))??.sum();
        let last = scope.get("p")?.sum();
        Ok::<_, GraphError>(first + shadowed + last)
    });

    assert_eq!(f.call((), Payload::list([2.0])).unwrap(), 6.0);
    assert_eq!(counter.count(), 1);
}

#[test]
fn test_forward_called_from_inside_a_forward_joins_the_call() {
    let main = nested_graph().unwrap();
    let m1 = main.module("m1").unwrap();
    main.param("p0").unwrap().to_dynamic().unwrap();

    let inner: Forward<Tensor, (), f64, GraphError> =
        Forward::new(&m1, "inner", &["p1", "m2.p2"], |_, params, ()| {
            Ok(params.get("p1")?.sum() + params.get("m2.p2")?.sum())
        });
    let outer = Forward::new(&main, "outer", &["p0"], move |_, params, ()| {
        let nested = inner.call((), Payload::None)?;
        Ok::<_, GraphError>(params.get("p0")?.sum() + nested)
    });

    assert_eq!(outer.call((), Payload::list([0.5])).unwrap(), 3.5);
    assert_graph_inactive(&main).unwrap();
}
