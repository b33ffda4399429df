use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{InstanceInfo, InstanceStatus, Provider, ProviderError, filter_duplicates};
use crate::Event;

#[derive(Default)]
struct Store {
    instances: HashMap<String, InstanceInfo>,
    histories: HashMap<String, Vec<Event>>,
    // creation order for list_instances
    order: Vec<String>,
}

/// Volatile provider; everything is lost when the value is dropped.
#[derive(Default)]
pub struct InMemoryProvider {
    inner: Mutex<Store>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Provider for InMemoryProvider {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create_instance(&self, info: InstanceInfo) -> Result<(), ProviderError> {
        let mut g = self.inner.lock().await;
        if g.instances.contains_key(&info.instance_id) {
            return Err(ProviderError::already_exists("create_instance", &info.instance_id));
        }
        let id = info.instance_id.clone();
        g.histories.insert(id.clone(), Vec::new());
        g.order.push(id.clone());
        g.instances.insert(id, info);
        Ok(())
    }

    async fn get_instance(&self, instance: &str) -> Result<Option<InstanceInfo>, ProviderError> {
        Ok(self.inner.lock().await.instances.get(instance).cloned())
    }

    async fn update_instance_status(
        &self,
        instance: &str,
        status: InstanceStatus,
        output: Option<String>,
    ) -> Result<(), ProviderError> {
        let mut g = self.inner.lock().await;
        let info = g
            .instances
            .get_mut(instance)
            .ok_or_else(|| ProviderError::not_found("update_instance_status", instance))?;
        info.status = status;
        info.output = output;
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.inner.lock().await.order.clone())
    }

    async fn read(&self, instance: &str) -> Result<Vec<Event>, ProviderError> {
        Ok(self.inner.lock().await.histories.get(instance).cloned().unwrap_or_default())
    }

    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), ProviderError> {
        let mut g = self.inner.lock().await;
        let history = g
            .histories
            .get_mut(instance)
            .ok_or_else(|| ProviderError::not_found("append", instance))?;
        let kept = filter_duplicates(history, new_events);
        history.extend(kept);
        Ok(())
    }
}
