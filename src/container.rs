//! Dependency-injection collaborator.
//!
//! The router only ever asks a container two questions: does it know an identifier,
//! and what instance does the identifier resolve to. Middleware names, controller
//! identifiers, named functions and service parameters all go through it.

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use parking_lot::RwLock;

use crate::{
    handler::{Controller, FnHandler},
    middleware::{Middleware, ProcessMiddleware},
};

/// Instance a container hands back, tagged by the contract it implements.
#[derive(Clone)]
pub enum Instance {
    Controller(Arc<dyn Controller>),
    /// Native `handle(request, next, params)` middleware.
    Middleware(Arc<dyn Middleware>),
    /// Middleware written against the `process(request, handler)` protocol.
    Process(Arc<dyn ProcessMiddleware>),
    /// A named function, used to restore cached `callable` handlers.
    Function(FnHandler),
    /// Any other value, injectable into handler parameters.
    Value(Arc<dyn Any + Send + Sync>),
}

impl Instance {
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Instance::Value(Arc::new(value))
    }

    pub fn controller<C: Controller>(controller: C) -> Self {
        Instance::Controller(Arc::new(controller))
    }

    pub fn middleware<M: Middleware>(middleware: M) -> Self {
        Instance::Middleware(Arc::new(middleware))
    }

    pub fn process<M: ProcessMiddleware>(middleware: M) -> Self {
        Instance::Process(Arc::new(middleware))
    }

    /// Short runtime description used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Instance::Controller(_) => "controller",
            Instance::Middleware(_) => "middleware",
            Instance::Process(_) => "process middleware",
            Instance::Function(_) => "function",
            Instance::Value(_) => "value",
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance({})", self.kind())
    }
}

/// The `has`/`get` capability consulted by the router.
pub trait Container: Send + Sync {
    fn has(&self, id: &str) -> bool;
    fn get(&self, id: &str) -> Option<Instance>;
}

/// In-memory container keyed by identifier.
#[derive(Default)]
pub struct ServiceContainer {
    entries: RwLock<HashMap<String, Instance>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `id`, replacing any previous binding.
    pub fn bind(&self, id: impl Into<String>, instance: Instance) -> &Self {
        self.entries.write().insert(id.into(), instance);
        self
    }

    /// Binds a named function under its own name.
    pub fn bind_function(&self, function: FnHandler) -> &Self {
        if let Some(name) = function.name() {
            let name = name.to_string();
            self.bind(name, Instance::Function(function));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Container for ServiceContainer {
    fn has(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    fn get(&self, id: &str) -> Option<Instance> {
        self.entries.read().get(id).cloned()
    }
}

impl fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read();
        let mut ids: Vec<_> = entries.keys().collect();
        ids.sort();
        f.debug_struct("ServiceContainer").field("ids", &ids).finish()
    }
}
