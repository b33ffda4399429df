//! Name-keyed registries for orchestrations and activities.
//!
//! One generic `Registry<H>` backs both handler kinds. Registries are
//! immutable once built and cheap to clone.

use super::{ActivityHandler, FnActivity, FnOrchestration, OrchestrationHandler};
use crate::_typed_codec::Codec;
use crate::{ActivityContext, OrchestrationContext};
use std::collections::HashMap;
use std::sync::Arc;

/// Generic immutable registry.
pub struct Registry<H: ?Sized> {
    pub(crate) inner: Arc<HashMap<String, Arc<H>>>,
}

// Manual Clone impl since H: ?Sized doesn't auto-derive Clone
impl<H: ?Sized> Clone for Registry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: ?Sized> Default for Registry<H> {
    fn default() -> Self {
        Self {
            inner: Arc::new(HashMap::new()),
        }
    }
}

/// Generic registry builder. Registration errors are collected and reported
/// by [`RegistryBuilder::build_result`].
pub struct RegistryBuilder<H: ?Sized> {
    map: HashMap<String, Arc<H>>,
    errors: Vec<String>,
}

pub type OrchestrationRegistry = Registry<dyn OrchestrationHandler>;
pub type ActivityRegistry = Registry<dyn ActivityHandler>;
pub type OrchestrationRegistryBuilder = RegistryBuilder<dyn OrchestrationHandler>;
pub type ActivityRegistryBuilder = RegistryBuilder<dyn ActivityHandler>;

impl<H: ?Sized> Registry<H> {
    pub fn builder() -> RegistryBuilder<H> {
        RegistryBuilder {
            map: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn builder_from(reg: &Registry<H>) -> RegistryBuilder<H> {
        RegistryBuilder {
            map: reg.inner.as_ref().clone(),
            errors: Vec::new(),
        }
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<H>> {
        let result = self.inner.get(name).cloned();
        if result.is_none() {
            self.log_registry_miss(name);
        }
        result
    }

    /// All registered names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.inner.len()
    }

    fn log_registry_miss(&self, name: &str) {
        tracing::debug!(
            target: "durable_fanout::runtime::registry",
            requested_name = %name,
            registered_count = self.inner.len(),
            registered_names = ?self.list_names(),
            "Registry lookup miss"
        );
    }
}

impl<H: ?Sized> RegistryBuilder<H> {
    pub fn build(self) -> Registry<H> {
        if !self.errors.is_empty() {
            tracing::warn!(
                target: "durable_fanout::runtime::registry",
                errors = ?self.errors,
                "registry built with ignored registration errors"
            );
        }
        Registry {
            inner: Arc::new(self.map),
        }
    }

    /// Build the registry, returning an error if there were any registration errors.
    ///
    /// # Errors
    ///
    /// Returns all registration errors joined with `"; "`.
    pub fn build_result(self) -> Result<Registry<H>, String> {
        if self.errors.is_empty() {
            Ok(self.build())
        } else {
            Err(self.errors.join("; "))
        }
    }

    fn merge_registry(mut self, other: Registry<H>, error_prefix: &str) -> Self {
        for (name, handler) in other.inner.iter() {
            if self.map.contains_key(name) {
                self.errors.push(format!("duplicate {error_prefix} in merge: {name}"));
            } else {
                self.map.insert(name.clone(), handler.clone());
            }
        }
        self
    }

    /// Validate a name and record an error when it can't be registered.
    /// Returns true when the registration must be skipped.
    fn reject(&mut self, name: &str, error_prefix: &str) -> bool {
        if name.is_empty() {
            self.errors.push(format!("empty {error_prefix} name"));
            return true;
        }
        if self.map.contains_key(name) {
            self.errors.push(format!("duplicate {error_prefix} registration: {name}"));
            return true;
        }
        false
    }

    fn insert(mut self, name: String, handler: Arc<H>, error_prefix: &str) -> Self {
        if !self.reject(&name, error_prefix) {
            self.map.insert(name, handler);
        }
        self
    }
}

impl OrchestrationRegistryBuilder {
    pub fn register<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
    {
        self.insert(name.into(), Arc::new(FnOrchestration(f)), "orchestration")
    }

    /// Register an orchestration with JSON-decoded input and JSON-encoded output.
    pub fn register_typed<In, Out, F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        In: serde::de::DeserializeOwned + Send + 'static,
        Out: serde::Serialize + Send + 'static,
        F: Fn(OrchestrationContext, In) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Out, String>> + Send + 'static,
    {
        let f = Arc::new(f);
        let wrapper = move |ctx: OrchestrationContext, input_s: String| {
            let f_inner = f.clone();
            async move {
                let input: In = crate::_typed_codec::Json::decode(&input_s)?;
                let out: Out = (f_inner)(ctx, input).await?;
                crate::_typed_codec::Json::encode(&out)
            }
        };
        self.insert(name.into(), Arc::new(FnOrchestration(wrapper)), "orchestration")
    }

    pub fn merge(self, other: OrchestrationRegistry) -> Self {
        self.merge_registry(other, "orchestration")
    }
}

impl ActivityRegistryBuilder {
    pub fn register<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ActivityContext, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
    {
        self.insert(name.into(), Arc::new(FnActivity(f)), "activity")
    }

    /// Register an activity with JSON-decoded input and JSON-encoded output.
    pub fn register_typed<In, Out, F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        In: serde::de::DeserializeOwned + Send + 'static,
        Out: serde::Serialize + Send + 'static,
        F: Fn(ActivityContext, In) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Out, String>> + Send + 'static,
    {
        let f = Arc::new(f);
        let wrapper = move |ctx: ActivityContext, input_s: String| {
            let f_inner = f.clone();
            async move {
                let input: In = crate::_typed_codec::Json::decode(&input_s)?;
                let out: Out = (f_inner)(ctx, input).await?;
                crate::_typed_codec::Json::encode(&out)
            }
        };
        self.insert(name.into(), Arc::new(FnActivity(wrapper)), "activity")
    }

    pub fn merge(self, other: ActivityRegistry) -> Self {
        self.merge_registry(other, "activity")
    }
}
