#![allow(dead_code)]

use durable_fanout::Event;
use durable_fanout::provider_validations::ProviderFactory;
use durable_fanout::providers::Provider;
use durable_fanout::providers::fs::FsProvider;
use durable_fanout::providers::in_memory::InMemoryProvider;
use durable_fanout::providers::sqlite::SqliteProvider;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const WAIT: Duration = Duration::from_secs(10);

pub async fn wait_for_history<F>(store: Arc<dyn Provider>, instance: &str, predicate: F, timeout_ms: u64) -> bool
where
    F: Fn(&Vec<Event>) -> bool,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        let hist = store.read(instance).await.unwrap_or_default();
        if predicate(&hist) {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn count_scheduled(hist: &[Event]) -> usize {
    hist.iter().filter(|e| matches!(e, Event::CallScheduled { .. })).count()
}

pub fn create_memory_store() -> Arc<dyn Provider> {
    Arc::new(InMemoryProvider::default())
}

pub async fn create_fs_store() -> (Arc<dyn Provider>, TempDir) {
    let td = tempfile::tempdir().unwrap();
    let store = Arc::new(FsProvider::new(td.path(), true).await.unwrap()) as Arc<dyn Provider>;
    (store, td)
}

pub async fn create_sqlite_store_disk() -> (Arc<dyn Provider>, TempDir) {
    let td = tempfile::tempdir().unwrap();
    let db_url = sqlite_url(&td);
    let store = Arc::new(SqliteProvider::new(&db_url).await.unwrap()) as Arc<dyn Provider>;
    (store, td)
}

pub fn sqlite_url(td: &TempDir) -> String {
    format!("sqlite:{}?mode=rwc", td.path().join("test.db").display())
}

pub struct InMemoryFactory;

#[async_trait::async_trait]
impl ProviderFactory for InMemoryFactory {
    async fn create_provider(&self) -> Arc<dyn Provider> {
        create_memory_store()
    }
}

/// Fresh directory per provider; directories live as long as the factory.
#[derive(Default)]
pub struct FsFactory {
    dirs: Mutex<Vec<TempDir>>,
}

#[async_trait::async_trait]
impl ProviderFactory for FsFactory {
    async fn create_provider(&self) -> Arc<dyn Provider> {
        let (store, td) = create_fs_store().await;
        self.dirs.lock().unwrap().push(td);
        store
    }
}

pub struct SqliteMemoryFactory;

#[async_trait::async_trait]
impl ProviderFactory for SqliteMemoryFactory {
    async fn create_provider(&self) -> Arc<dyn Provider> {
        Arc::new(SqliteProvider::new_in_memory().await.unwrap())
    }
}

#[derive(Default)]
pub struct SqliteFileFactory {
    dirs: Mutex<Vec<TempDir>>,
}

#[async_trait::async_trait]
impl ProviderFactory for SqliteFileFactory {
    async fn create_provider(&self) -> Arc<dyn Provider> {
        let (store, td) = create_sqlite_store_disk().await;
        self.dirs.lock().unwrap().push(td);
        store
    }
}
