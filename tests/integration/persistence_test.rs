//! Persistence of graph state through the in-memory chain store
//!
//! Chains written by [`StateService`] are round-tripped through
//! [`InMemoryChainStore`], which serializes them to JSON on every write.

use std::sync::Arc;

use caskade_core::{
    ChainStore, Forward, GraphError, GraphResult, LinkValues, Module, Param, ParamState, Payload,
    StateService, Tensor,
};
use caskade_state_inmemory::InMemoryChainStore;
use caskade_test_utils::{assert_param_value, init_test_logging, nested_graph, ScenarioGraph};
use serde_json::json;

fn service() -> (StateService, InMemoryChainStore) {
    let store = InMemoryChainStore::new();
    (StateService::new(Arc::new(store.clone())), store)
}

#[tokio::test]
async fn test_snapshot_round_trip() {
    init_test_logging();
    let (service, store) = service();
    let main = nested_graph().unwrap();

    let chain = service.save_state(&main, "snapshot", false).await.unwrap();
    assert_eq!(chain.records, 1);
    assert!(chain.groups.contains_key("main/m1/m2/p2"));
    assert_eq!(store.list_chains().await.unwrap(), vec!["snapshot"]);

    main.find_param("m1.m2.p2").unwrap().set_value(20.0).unwrap();
    main.param("p0").unwrap().set_value(-1.0).unwrap();

    assert_eq!(service.load_state(&main, "snapshot", None).await.unwrap(), 0);
    assert_param_value(&main, "m1.m2.p2", 2.0).unwrap();
    assert_param_value(&main, "p0", 0.0).unwrap();

    assert!(matches!(
        service.append_state(&main, "snapshot").await,
        Err(GraphError::Schema(_))
    ));
}

#[tokio::test]
async fn test_appendable_history() {
    let (service, _) = service();
    let graph = ScenarioGraph::new().unwrap();
    let f = graph.sum();

    f.call((), Payload::list([3.0, 4.0])).unwrap();
    service.save_state(&graph.module, "history", true).await.unwrap();

    f.call((), Payload::list([5.0, 6.0])).unwrap();
    assert_eq!(service.append_state(&graph.module, "history").await.unwrap(), 2);
    assert_eq!(service.record_count("history").await.unwrap(), 2);

    // loading a record fixes the remembered values as static
    service.load_state(&graph.module, "history", Some(0)).await.unwrap();
    assert_param_value(&graph.module, "x", 3.0).unwrap();
    assert_param_value(&graph.module, "y", 4.0).unwrap();
    assert_eq!(graph.y.state(), ParamState::Static);
    assert_eq!(f.call((), Payload::None).unwrap(), 9.0);

    service.load_state(&graph.module, "history", None).await.unwrap();
    assert_param_value(&graph.module, "x", 5.0).unwrap();

    assert!(matches!(
        service.load_state(&graph.module, "history", Some(2)).await,
        Err(GraphError::IndexOutOfRange { index: 2, len: 2, .. })
    ));
}

#[tokio::test]
async fn test_structure_mismatch_is_rejected_untouched() {
    let (service, _) = service();
    let main = nested_graph().unwrap();
    service.save_state(&main, "run", true).await.unwrap();

    let other: Module = Module::new("main");
    let p0 = other.add_param("p0", Param::with_value("p0", 5.0)).unwrap();
    assert!(matches!(
        service.load_state(&other, "run", None).await,
        Err(GraphError::Schema(_))
    ));
    assert_eq!(p0.value(), Some(Tensor::scalar(5.0)));

    assert!(matches!(
        service.load_state(&main, "missing", None).await,
        Err(GraphError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_pointers_and_metadata_survive_reload() {
    let (service, _) = service();
    let m: Module = Module::new("m");
    let base = m.add_param("base", Param::with_value("base", 2.0)).unwrap();
    let double = Param::pointer("double", &[("base", &base)], |links: &LinkValues<Tensor>| -> GraphResult<Tensor> {
        Ok(links.get("base")?.map(|v| v * 2.0))
    })
    .unwrap()
    .with_metadata("unit", json!("m/s"));
    let double = m.add_param("double", double).unwrap();

    let chain = service.save_state(&m, "ptr", false).await.unwrap();
    assert_eq!(chain.groups["m/double"].state, Some(ParamState::Pointer));

    base.set_value(10.0).unwrap();
    double.set_metadata("unit", json!("km/h"));
    service.load_state(&m, "ptr", None).await.unwrap();

    assert!(double.is_pointer());
    assert_eq!(double.metadata().get("unit"), Some(&json!("m/s")));
    let read = Forward::new(&m, "read", &["double"], |_, params, ()| {
        Ok::<_, GraphError>(params.get("double")?.sum())
    });
    assert_eq!(read.call((), Payload::None).unwrap(), 4.0);
}

#[tokio::test]
async fn test_state_operations_rejected_while_active() {
    let (service, _) = service();
    let graph = ScenarioGraph::new().unwrap();
    service.save_state(&graph.module, "busy", true).await.unwrap();

    let ctx = caskade_core::ActivationContext::enter(&graph.module, Payload::list([1.0, 1.0])).unwrap();
    let err = service.append_state(&graph.module, "busy").await.unwrap_err();
    assert!(matches!(err, GraphError::ActiveState(_)));
    ctx.finish();

    assert_eq!(service.append_state(&graph.module, "busy").await.unwrap(), 2);
    assert!(service.delete_chain("busy").await.unwrap());
    assert!(service.list_chains().await.unwrap().is_empty());
}
