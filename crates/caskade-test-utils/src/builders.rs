//! Graph builders and fixtures
//!
//! [`ModuleBuilder`] assembles module trees declaratively; the fixtures
//! build the small graphs most tests start from.

use std::sync::Arc;

use caskade_core::{
    EngineConfig, Forward, GraphError, GraphResult, Module, Param, Shape, Tensor,
};

enum Child {
    Param(String, Param),
    Module(String, ModuleBuilder),
}

/// Declarative builder for a module tree over the default backend
pub struct ModuleBuilder {
    name: String,
    config: Option<Arc<EngineConfig>>,
    children: Vec<Child>,
}

impl ModuleBuilder {
    /// Start a module named `name`
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: None,
            children: Vec::new(),
        }
    }

    /// Attach a configuration to the built module
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(Arc::new(config));
        self
    }

    /// Add a dynamic parameter without a declared shape
    pub fn dynamic(self, name: &str) -> Self {
        let param = Param::dynamic(name);
        self.param(name, param)
    }

    /// Add a dynamic parameter with a declared shape
    pub fn dynamic_shaped(self, name: &str, shape: impl Into<Shape>) -> Self {
        let param = Param::dynamic_with_shape(name, shape);
        self.param(name, param)
    }

    /// Add a static parameter
    pub fn fixed(self, name: &str, value: impl Into<Tensor>) -> Self {
        let param = Param::with_value(name, value);
        self.param(name, param)
    }

    /// Add an existing parameter handle
    pub fn param(mut self, name: &str, param: Param) -> Self {
        self.children.push(Child::Param(name.to_string(), param));
        self
    }

    /// Add a sub-module
    pub fn child(mut self, name: &str, child: ModuleBuilder) -> Self {
        self.children.push(Child::Module(name.to_string(), child));
        self
    }

    /// Build the module tree
    pub fn build(self) -> GraphResult<Module> {
        let module = match self.config {
            Some(config) => Module::with_config(&self.name, config),
            None => Module::new(&self.name),
        };
        for child in self.children {
            match child {
                Child::Param(name, param) => {
                    module.add_param(&name, param)?;
                }
                Child::Module(name, builder) => {
                    module.add_module(&name, builder.build()?)?;
                }
            }
        }
        Ok(module)
    }
}

/// Module `m` with dynamic scalars `x`, `y` and static `k = 2.0`
pub struct ScenarioGraph {
    /// Root module
    pub module: Module,
    /// Dynamic scalar `x`
    pub x: Param,
    /// Dynamic scalar `y`
    pub y: Param,
    /// Static `k`
    pub k: Param,
}

impl ScenarioGraph {
    /// Build the scenario graph
    pub fn new() -> GraphResult<Self> {
        let module = ModuleBuilder::new("m")
            .dynamic_shaped("x", [])
            .dynamic_shaped("y", [])
            .fixed("k", 2.0)
            .build()?;
        Ok(Self {
            x: module.param("x")?,
            y: module.param("y")?,
            k: module.param("k")?,
            module,
        })
    }

    /// Forward returning `x + y + k`
    pub fn sum(&self) -> Forward<Tensor, (), f64, GraphError> {
        Forward::new(&self.module, "f", &["x", "y", "k"], |_, params, ()| {
            let mut total = 0.0;
            for (_, value) in params.iter() {
                total += value.sum();
            }
            Ok(total)
        })
    }
}

/// Module tree `main { p0, m1 { p1, m2 { p2 } } }` with static scalars
pub fn nested_graph() -> GraphResult<Module> {
    ModuleBuilder::new("main")
        .fixed("p0", 0.0)
        .child(
            "m1",
            ModuleBuilder::new("m1")
                .fixed("p1", 1.0)
                .child("m2", ModuleBuilder::new("m2").fixed("p2", 2.0)),
        )
        .build()
}
