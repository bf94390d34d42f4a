//! Flattening dynamic parameters
//!
//! A [`Flattener`] captures the ordered dynamic parameters reachable from a
//! root module and converts between their values and the three payload
//! forms accepted by a forward call:
//!
//! - a flat array whose last axis concatenates every parameter, with any
//!   leading axes treated as batch dimensions
//! - a list holding one value per parameter, or one value per top-level
//!   child holding dynamic parameters
//! - a mapping from qualified path to value
//!
//! In a list by children, a child that is itself a dynamic parameter takes
//! its value directly and any other child takes a flat array covering its
//! own dynamic parameters. A list whose length matches the number of
//! dynamic parameters is always read per parameter.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::domain::module::Module;
use crate::domain::param::{Param, ParamState};
use crate::domain::traversal;
use crate::error::{GraphError, GraphResult};
use crate::types::{NumericValue, Shape};

/// Parameter values supplied to a top-level call
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<V> {
    /// No values; valid only when no parameter is dynamic
    None,
    /// One flat array, positional by flattening order
    Array(V),
    /// One value per dynamic parameter, positional by flattening order
    List(Vec<V>),
    /// Values keyed by qualified parameter path
    Mapping(BTreeMap<String, V>),
}

impl<V> Payload<V> {
    /// Flat array payload
    pub fn array(value: impl Into<V>) -> Self {
        Payload::Array(value.into())
    }

    /// List payload
    pub fn list<T: Into<V>>(values: impl IntoIterator<Item = T>) -> Self {
        Payload::List(values.into_iter().map(Into::into).collect())
    }

    /// Mapping payload
    pub fn mapping<K: Into<String>, T: Into<V>>(entries: impl IntoIterator<Item = (K, T)>) -> Self {
        Payload::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Payload::None => "no payload",
            Payload::Array(_) => "array payload",
            Payload::List(_) => "list payload",
            Payload::Mapping(_) => "mapping payload",
        }
    }
}

impl<V> Default for Payload<V> {
    fn default() -> Self {
        Payload::None
    }
}

/// A dynamic parameter and its qualified path
#[derive(Debug, Clone)]
pub struct FlatEntry<V: NumericValue> {
    /// Qualified path relative to the root
    pub path: String,
    /// The parameter
    pub param: Param<V>,
}

/// Consecutive entries sharing a top-level child
struct ChildGroup<'a> {
    name: &'a str,
    range: Range<usize>,
}

/// Ordered view over the dynamic parameters of a graph
#[derive(Debug, Clone)]
pub struct Flattener<V: NumericValue> {
    entries: Vec<FlatEntry<V>>,
    config: Arc<EngineConfig>,
}

impl<V: NumericValue> Flattener<V> {
    /// Capture the dynamic parameters reachable from `root`
    pub fn new(root: &Module<V>) -> Self {
        let config = root.config();
        let entries = traversal::walk_params(root, &config.path_separator)
            .into_iter()
            .filter(|(_, param)| param.state() == ParamState::Dynamic)
            .map(|(path, param)| FlatEntry { path, param })
            .collect();
        Self { entries, config }
    }

    /// Entries in flattening order
    pub fn entries(&self) -> &[FlatEntry<V>] {
        &self.entries
    }

    /// Qualified paths in flattening order
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.path.as_str()).collect()
    }

    /// Number of dynamic parameters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no parameter is dynamic
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of elements across all declared shapes
    ///
    /// This is the required last-axis length of an array payload.
    pub fn total_size(&self) -> GraphResult<usize> {
        self.entries
            .iter()
            .map(|entry| self.declared_shape(entry).map(|s| s.numel()))
            .sum()
    }

    /// Pair every dynamic parameter with its value from `payload`
    ///
    /// Validates the whole payload before returning; nothing is modified.
    pub fn split(&self, payload: Payload<V>) -> GraphResult<Vec<(Param<V>, V)>> {
        match payload {
            Payload::None if self.entries.is_empty() => Ok(Vec::new()),
            Payload::None => Err(GraphError::Payload(format!(
                "{} dynamic parameters require values but none were supplied: {}",
                self.entries.len(),
                self.paths().join(", ")
            ))),
            Payload::Array(array) => self.split_array(&array),
            Payload::List(values) => {
                if values.len() == self.entries.len() {
                    return self.pair(values);
                }
                let groups = self.child_groups();
                if values.len() != groups.len() {
                    return Err(self.list_count_error(values.len(), groups.len()));
                }
                let mut pairs = Vec::with_capacity(self.entries.len());
                for (group, value) in groups.iter().zip(values) {
                    let sub = self.subset(group);
                    if self.is_direct(group) {
                        pairs.extend(sub.pair(vec![value])?);
                    } else {
                        pairs.extend(sub.split_array(&value)?);
                    }
                }
                Ok(pairs)
            }
            Payload::Mapping(mut values) => {
                let mut ordered = Vec::with_capacity(self.entries.len());
                for entry in &self.entries {
                    let value = values.remove(&entry.path).ok_or_else(|| {
                        GraphError::Payload(format!(
                            "mapping payload has no value for '{}'",
                            entry.path
                        ))
                    })?;
                    ordered.push(value);
                }
                if !values.is_empty() && !self.config.allow_unknown_keys {
                    let unknown: Vec<_> = values.keys().map(String::as_str).collect();
                    return Err(GraphError::Payload(format!(
                        "mapping payload has keys naming no dynamic parameter: {}",
                        unknown.join(", ")
                    )));
                }
                self.pair(ordered)
            }
        }
    }

    /// Convert a payload from parameter values to their valid representation
    ///
    /// The payload keeps its form; a list by children stays a list by
    /// children. Parameters without a valid range pass through unchanged.
    pub fn to_valid(&self, payload: Payload<V>) -> GraphResult<Payload<V>> {
        self.convert(payload, |param, value| param.to_valid(value))
    }

    /// Convert a payload from the valid representation back to parameter values
    pub fn from_valid(&self, payload: Payload<V>) -> GraphResult<Payload<V>> {
        self.convert(payload, |param, value| param.from_valid(value))
    }

    fn convert<F>(&self, payload: Payload<V>, f: F) -> GraphResult<Payload<V>>
    where
        F: Fn(&Param<V>, &V) -> GraphResult<V>,
    {
        let convert_all = |flattener: &Flattener<V>, values: Vec<V>| -> GraphResult<Vec<V>> {
            flattener
                .entries
                .iter()
                .zip(&values)
                .map(|(entry, value)| f(&entry.param, value))
                .collect()
        };
        match payload {
            Payload::None => Ok(Payload::None),
            Payload::Array(array) => {
                let values = self.split_array(&array)?.into_iter().map(|(_, v)| v).collect();
                Ok(Payload::Array(self.build_array(&convert_all(self, values)?)?))
            }
            Payload::List(values) if values.len() == self.entries.len() => {
                let values = self.pair(values)?.into_iter().map(|(_, v)| v).collect();
                Ok(Payload::List(convert_all(self, values)?))
            }
            Payload::List(values) => {
                let groups = self.child_groups();
                if values.len() != groups.len() {
                    return Err(self.list_count_error(values.len(), groups.len()));
                }
                let mut converted = Vec::with_capacity(values.len());
                for (group, value) in groups.iter().zip(values) {
                    let sub = self.subset(group);
                    if self.is_direct(group) {
                        let values = sub.pair(vec![value])?.into_iter().map(|(_, v)| v).collect();
                        converted.extend(convert_all(&sub, values)?);
                    } else {
                        let values = sub.split_array(&value)?.into_iter().map(|(_, v)| v).collect();
                        converted.push(sub.build_array(&convert_all(&sub, values)?)?);
                    }
                }
                Ok(Payload::List(converted))
            }
            Payload::Mapping(values) => {
                let mut converted = BTreeMap::new();
                for (path, value) in values {
                    let value = match self.entries.iter().find(|entry| entry.path == path) {
                        Some(entry) => {
                            self.check_value(entry, &value)?;
                            f(&entry.param, &value)?
                        }
                        None => value,
                    };
                    converted.insert(path, value);
                }
                Ok(Payload::Mapping(converted))
            }
        }
    }

    /// Last known value of every dynamic parameter, in flattening order
    pub fn extract_values(&self) -> GraphResult<Vec<V>> {
        self.entries
            .iter()
            .map(|entry| {
                entry.param.last_value().ok_or_else(|| {
                    GraphError::Unresolved(format!(
                        "dynamic parameter '{}' has no known value",
                        entry.path
                    ))
                })
            })
            .collect()
    }

    /// Concatenate per-parameter values into one flat array
    pub fn build_array(&self, values: &[V]) -> GraphResult<V> {
        self.check_count(values.len(), "values")?;
        if values.is_empty() {
            return Err(GraphError::Payload(
                "cannot build an array without dynamic parameters".to_string(),
            ));
        }
        let mut batch: Option<Shape> = None;
        let mut pieces = Vec::with_capacity(values.len());
        for (entry, value) in self.entries.iter().zip(values) {
            let declared = self.declared_shape(entry)?;
            let shape = value.shape();
            let prefix = shape.batch_prefix(&declared).ok_or_else(|| {
                self.shape_error(entry, &shape, &declared)
            })?;
            match &batch {
                Some(existing) if *existing != prefix => {
                    return Err(GraphError::Shape(format!(
                        "batch shape {} of '{}' differs from batch shape {}",
                        prefix, entry.path, existing
                    )));
                }
                Some(_) => {}
                None => batch = Some(prefix.clone()),
            }
            let flat = prefix.join(&Shape::new(vec![declared.numel()]));
            pieces.push(value.reshape(&flat).ok_or_else(|| {
                GraphError::Shape(format!("cannot flatten value of '{}' to {}", entry.path, flat))
            })?);
        }
        V::concatenate_last(&pieces).ok_or_else(|| {
            GraphError::Payload("numeric backend cannot concatenate flat arrays".to_string())
        })
    }

    /// Validate per-parameter values as a list payload
    pub fn build_list(&self, values: &[V]) -> GraphResult<Vec<V>> {
        self.check_count(values.len(), "values")?;
        for (entry, value) in self.entries.iter().zip(values) {
            self.check_value(entry, value)?;
        }
        Ok(values.to_vec())
    }

    /// Key per-parameter values by qualified path
    pub fn build_mapping(&self, values: &[V]) -> GraphResult<BTreeMap<String, V>> {
        self.check_count(values.len(), "values")?;
        let mut mapping = BTreeMap::new();
        for (entry, value) in self.entries.iter().zip(values) {
            self.check_value(entry, value)?;
            mapping.insert(entry.path.clone(), value.clone());
        }
        Ok(mapping)
    }

    fn split_array(&self, array: &V) -> GraphResult<Vec<(Param<V>, V)>> {
        let total = self.total_size()?;
        let shape = array.shape();
        let last = shape.last().ok_or_else(|| {
            GraphError::Payload(format!(
                "array payload must have at least one axis, got shape {}",
                shape
            ))
        })?;
        if last != total {
            return Err(GraphError::Payload(format!(
                "array payload has {} entries on its last axis but the dynamic parameters need {}",
                last, total
            )));
        }
        let batch = Shape::new(shape.dims()[..shape.rank() - 1].to_vec());
        let mut offset = 0;
        let mut pairs = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let declared = self.declared_shape(entry)?;
            let size = declared.numel();
            let target = batch.join(&declared);
            let value = array
                .slice_last(offset, size)
                .and_then(|piece| piece.reshape(&target))
                .ok_or_else(|| {
                    GraphError::Payload(format!(
                        "numeric backend cannot slice an array payload for '{}'",
                        entry.path
                    ))
                })?;
            pairs.push((entry.param.clone(), value));
            offset += size;
        }
        Ok(pairs)
    }

    fn pair(&self, values: Vec<V>) -> GraphResult<Vec<(Param<V>, V)>> {
        for (entry, value) in self.entries.iter().zip(&values) {
            self.check_value(entry, value)?;
        }
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.param.clone())
            .zip(values)
            .collect())
    }

    fn child_groups(&self) -> Vec<ChildGroup<'_>> {
        let separator = self.config.path_separator.as_str();
        let mut groups: Vec<ChildGroup<'_>> = Vec::new();
        for (i, entry) in self.entries.iter().enumerate() {
            let name = entry.path.split(separator).next().unwrap_or(entry.path.as_str());
            match groups.last_mut() {
                Some(group) if group.name == name => group.range.end = i + 1,
                _ => groups.push(ChildGroup {
                    name,
                    range: i..i + 1,
                }),
            }
        }
        groups
    }

    fn subset(&self, group: &ChildGroup<'_>) -> Flattener<V> {
        Flattener {
            entries: self.entries[group.range.clone()].to_vec(),
            config: self.config.clone(),
        }
    }

    /// Whether the child is itself the dynamic parameter
    fn is_direct(&self, group: &ChildGroup<'_>) -> bool {
        group.range.len() == 1 && self.entries[group.range.start].path == group.name
    }

    fn list_count_error(&self, got: usize, children: usize) -> GraphError {
        GraphError::Payload(format!(
            "list payload has {} entries but there are {} dynamic parameters in {} dynamic children",
            got,
            self.entries.len(),
            children
        ))
    }

    fn check_count(&self, got: usize, what: &str) -> GraphResult<()> {
        if got != self.entries.len() {
            return Err(GraphError::Payload(format!(
                "{} has {} entries but there are {} dynamic parameters",
                what,
                got,
                self.entries.len()
            )));
        }
        Ok(())
    }

    fn check_value(&self, entry: &FlatEntry<V>, value: &V) -> GraphResult<()> {
        if let Some(declared) = entry.param.shape() {
            let shape = value.shape();
            if !shape.ends_with(&declared) {
                return Err(self.shape_error(entry, &shape, &declared));
            }
        }
        Ok(())
    }

    fn declared_shape(&self, entry: &FlatEntry<V>) -> GraphResult<Shape> {
        entry.param.shape().ok_or_else(|| {
            GraphError::Shape(format!(
                "dynamic parameter '{}' needs a declared shape for array payloads",
                entry.path
            ))
        })
    }

    fn shape_error(&self, entry: &FlatEntry<V>, got: &Shape, declared: &Shape) -> GraphError {
        GraphError::Shape(format!(
            "value of shape {} for '{}' does not match its shape {}",
            got, entry.path, declared
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tensor;

    fn graph() -> Module<Tensor> {
        let root: Module<Tensor> = Module::new("root");
        root.add_param("a", Param::dynamic_with_shape("a", [2])).unwrap();
        root.add_param("k", Param::with_value("k", 1.0)).unwrap();
        let sub = root.add_module("sub", Module::new("sub")).unwrap();
        sub.add_param("b", Param::dynamic_with_shape("b", [])).unwrap();
        root
    }

    #[test]
    fn test_ordering_skips_static_params() {
        let flattener = graph().flattener();
        assert_eq!(flattener.paths(), vec!["a", "sub.b"]);
        assert_eq!(flattener.total_size().unwrap(), 3);
    }

    #[test]
    fn test_split_array() {
        let flattener = graph().flattener();
        let pairs = flattener
            .split(Payload::array(Tensor::vector(vec![1.0, 2.0, 3.0])))
            .unwrap();
        assert_eq!(pairs[0].1, Tensor::vector(vec![1.0, 2.0]));
        assert_eq!(pairs[1].1, Tensor::scalar(3.0));

        let err = flattener
            .split(Payload::array(Tensor::vector(vec![1.0, 2.0])))
            .unwrap_err();
        assert!(matches!(err, GraphError::Payload(_)));
    }

    #[test]
    fn test_split_batched_array() {
        let flattener = graph().flattener();
        let batched = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let pairs = flattener.split(Payload::Array(batched)).unwrap();
        assert_eq!(pairs[0].1.shape(), Shape::from([2, 2]));
        assert_eq!(pairs[0].1.data(), &[1.0, 2.0, 4.0, 5.0]);
        assert_eq!(pairs[1].1, Tensor::new(vec![3.0, 6.0], [2]).unwrap());
    }

    #[test]
    fn test_split_list_checks_shapes() {
        let flattener = graph().flattener();
        let err = flattener
            .split(Payload::list([Tensor::scalar(1.0), Tensor::scalar(2.0)]))
            .unwrap_err();
        assert!(matches!(err, GraphError::Shape(msg) if msg.contains("'a'")));

        let err = flattener.split(Payload::list([Tensor::scalar(1.0)])).unwrap_err();
        assert!(matches!(err, GraphError::Payload(_)));

        // differing leading batch dimensions are fine in list form
        let pairs = flattener
            .split(Payload::list([
                Tensor::full([3, 2], 0.5),
                Tensor::scalar(2.0),
            ]))
            .unwrap();
        assert_eq!(pairs[0].1.shape(), Shape::from([3, 2]));
    }

    #[test]
    fn test_split_mapping() {
        let flattener = graph().flattener();
        let pairs = flattener
            .split(Payload::mapping([
                ("sub.b", Tensor::scalar(3.0)),
                ("a", Tensor::vector(vec![1.0, 2.0])),
            ]))
            .unwrap();
        assert_eq!(pairs[1].1, Tensor::scalar(3.0));

        let err = flattener
            .split(Payload::mapping([("a", Tensor::vector(vec![1.0, 2.0]))]))
            .unwrap_err();
        assert!(matches!(err, GraphError::Payload(msg) if msg.contains("sub.b")));

        let err = flattener
            .split(Payload::mapping([
                ("a", Tensor::vector(vec![1.0, 2.0])),
                ("sub.b", Tensor::scalar(3.0)),
                ("bogus", Tensor::scalar(0.0)),
            ]))
            .unwrap_err();
        assert!(matches!(err, GraphError::Payload(msg) if msg.contains("bogus")));
    }

    #[test]
    fn test_unknown_keys_allowed_by_config() {
        let config = EngineConfig {
            allow_unknown_keys: true,
            ..Default::default()
        };
        let root: Module<Tensor> = Module::with_config("root", Arc::new(config));
        root.add_param("x", Param::dynamic("x")).unwrap();
        let pairs = root
            .flattener()
            .split(Payload::mapping([("x", 1.0), ("extra", 2.0)]))
            .unwrap();
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_missing_payload() {
        let flattener = graph().flattener();
        assert!(matches!(
            flattener.split(Payload::None).unwrap_err(),
            GraphError::Payload(_)
        ));
        let all_static: Module<Tensor> = Module::new("s");
        all_static.add_param("k", Param::with_value("k", 1.0)).unwrap();
        assert!(all_static.flattener().split(Payload::None).unwrap().is_empty());
    }

    #[test]
    fn test_array_needs_declared_shapes() {
        let root: Module<Tensor> = Module::new("root");
        root.add_param("x", Param::dynamic("x")).unwrap();
        let err = root
            .flattener()
            .split(Payload::array(Tensor::vector(vec![1.0])))
            .unwrap_err();
        assert!(matches!(err, GraphError::Shape(msg) if msg.contains("'x'")));
    }

    #[test]
    fn test_build_forms() {
        let flattener = graph().flattener();
        let values = vec![Tensor::vector(vec![1.0, 2.0]), Tensor::scalar(3.0)];
        let array = flattener.build_array(&values).unwrap();
        assert_eq!(array, Tensor::vector(vec![1.0, 2.0, 3.0]));

        let mapping = flattener.build_mapping(&values).unwrap();
        assert_eq!(mapping["sub.b"], Tensor::scalar(3.0));

        let err = flattener
            .build_list(&[Tensor::scalar(1.0), Tensor::scalar(3.0)])
            .unwrap_err();
        assert!(matches!(err, GraphError::Shape(_)));
    }

    #[test]
    fn test_scalar_backend_rejects_arrays() {
        let root: Module<f64> = Module::new("root");
        root.add_param("x", Param::dynamic_with_shape("x", [])).unwrap();
        let flattener = root.flattener();
        assert!(matches!(
            flattener.split(Payload::Array(1.0)).unwrap_err(),
            GraphError::Payload(_)
        ));
        let pairs = flattener.split(Payload::list([1.5])).unwrap();
        assert_eq!(pairs[0].1, 1.5);
    }

    fn nested() -> Module<Tensor> {
        let main: Module<Tensor> = Module::new("main");
        main.add_param("b", Param::dynamic_with_shape("b", [2, 2])).unwrap();
        main.add_param("c", Param::with_value("c", 1.0)).unwrap();
        let m1 = main.add_module("m1", Module::new("m1")).unwrap();
        m1.add_param("d", Param::dynamic_with_shape("d", [])).unwrap();
        m1.add_param("e", Param::dynamic_with_shape("e", [])).unwrap();
        m1.add_param("f", Param::dynamic_with_shape("f", [])).unwrap();
        main
    }

    #[test]
    fn test_split_list_by_children() {
        let flattener = nested().flattener();
        let pairs = flattener
            .split(Payload::list([
                Tensor::full([2, 2], 1.0),
                Tensor::vector(vec![3.0, 4.0, 1.0]),
            ]))
            .unwrap();
        let names: Vec<_> = pairs.iter().map(|(p, _)| p.name().to_string()).collect();
        assert_eq!(names, vec!["b", "d", "e", "f"]);
        assert_eq!(pairs[0].1, Tensor::full([2, 2], 1.0));
        assert_eq!(pairs[2].1, Tensor::scalar(4.0));

        // batched sub-module arrays carry their batch axis
        let pairs = flattener
            .split(Payload::list([
                Tensor::full([2, 2], 0.0),
                Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap(),
            ]))
            .unwrap();
        assert_eq!(pairs[1].1, Tensor::vector(vec![1.0, 4.0]));
    }

    #[test]
    fn test_list_count_error_reports_both_counts() {
        let flattener = nested().flattener();
        let err = flattener
            .split(Payload::list([Tensor::scalar(1.0), Tensor::scalar(2.0), Tensor::scalar(3.0)]))
            .unwrap_err();
        match err {
            GraphError::Payload(msg) => {
                assert!(msg.contains("3 entries"), "{}", msg);
                assert!(msg.contains("4 dynamic parameters"), "{}", msg);
                assert!(msg.contains("2 dynamic children"), "{}", msg);
            }
            other => panic!("expected a payload error, got {:?}", other),
        }
    }

    fn ranged() -> Module<Tensor> {
        let main: Module<Tensor> = Module::new("main");
        main.add_param(
            "b",
            Param::dynamic_with_shape("b", [2])
                .with_valid(crate::domain::valid::ValidRange::bounded(0.0, 2.0).unwrap())
                .unwrap(),
        )
        .unwrap();
        let m1 = main.add_module("m1", Module::new("m1")).unwrap();
        m1.add_param(
            "d",
            Param::dynamic_with_shape("d", [])
                .with_valid(crate::domain::valid::ValidRange::at_least(1.0))
                .unwrap(),
        )
        .unwrap();
        m1.add_param("e", Param::dynamic_with_shape("e", [])).unwrap();
        main
    }

    fn assert_close(a: &Tensor, b: &Tensor) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.data().iter().zip(b.data()) {
            assert!((x - y).abs() < 1e-9, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn test_valid_conversion_keeps_payload_form() {
        let flattener = ranged().flattener();

        let array = Tensor::vector(vec![0.5, 1.5, 2.0, 7.0]);
        let Payload::Array(there) = flattener.to_valid(Payload::array(array.clone())).unwrap() else {
            panic!("array payload changed form");
        };
        assert_eq!(there.data()[3], 7.0);
        let Payload::Array(back) = flattener.from_valid(Payload::Array(there)).unwrap() else {
            panic!("array payload changed form");
        };
        assert_close(&back, &array);

        let by_children = vec![Tensor::vector(vec![0.5, 1.5]), Tensor::vector(vec![2.0, 7.0])];
        let there = flattener.to_valid(Payload::List(by_children.clone())).unwrap();
        let Payload::List(back) = flattener.from_valid(there).unwrap() else {
            panic!("list payload changed form");
        };
        assert_eq!(back.len(), 2);
        assert_close(&back[0], &by_children[0]);
        assert_close(&back[1], &by_children[1]);

        let mapping = Payload::mapping([("b", Tensor::vector(vec![1.0, 1.0])), ("m1.e", Tensor::scalar(3.0))]);
        let Payload::Mapping(there) = flattener.to_valid(mapping).unwrap() else {
            panic!("mapping payload changed form");
        };
        assert_close(&there["b"], &Tensor::vector(vec![0.0, 0.0]));
        assert_eq!(there["m1.e"], Tensor::scalar(3.0));
    }
}
