use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::fs;

use super::{InstanceInfo, InstanceStatus, Provider, ProviderError, filter_duplicates};
use crate::Event;

const HISTORY_FILE: &str = "history.jsonl";
const INSTANCE_FILE: &str = "instance.json";

/// Filesystem-backed provider: one directory per instance holding
/// `instance.json` and an append-only `history.jsonl`.
///
/// Writes are serialized within the process; the directory must not be
/// shared by two live providers.
pub struct FsProvider {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsProvider {
    /// Create a provider rooted at `root`, creating the directory if needed.
    /// If `reset_on_create` is true, delete any existing data under the root first.
    pub async fn new(root: impl AsRef<Path>, reset_on_create: bool) -> Result<Self, ProviderError> {
        let root = root.as_ref().to_path_buf();
        if reset_on_create && fs::try_exists(&root).await? {
            fs::remove_dir_all(&root).await?;
        }
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn inst_root(&self, operation: &str, instance: &str) -> Result<PathBuf, ProviderError> {
        if instance.is_empty()
            || instance == "."
            || instance == ".."
            || instance.contains(['/', '\\'])
        {
            return Err(ProviderError::permanent(
                operation,
                format!("instance id '{instance}' is not a valid directory name"),
            ));
        }
        Ok(self.root.join(instance))
    }

    async fn read_info(&self, dir: &Path) -> Result<Option<InstanceInfo>, ProviderError> {
        let path = dir.join(INSTANCE_FILE);
        let data = match fs::read_to_string(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| ProviderError::permanent("get_instance", format!("{}: {e}", path.display())))
    }

    async fn write_info(&self, dir: &Path, info: &InstanceInfo) -> Result<(), ProviderError> {
        let body = serde_json::to_string_pretty(info)
            .map_err(|e| ProviderError::permanent("write_instance", e.to_string()))?;
        // Write-then-rename so readers never observe a half-written record
        let tmp = dir.join(format!("{INSTANCE_FILE}.tmp"));
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, dir.join(INSTANCE_FILE)).await?;
        Ok(())
    }

    async fn read_history(&self, dir: &Path, instance: &str) -> Result<Vec<Event>, ProviderError> {
        let data = match fs::read_to_string(dir.join(HISTORY_FILE)).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let lines: Vec<&str> = data.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut out = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            match serde_json::from_str::<Event>(line) {
                Ok(ev) => out.push(ev),
                Err(e) if idx + 1 == lines.len() && !data.ends_with('\n') => {
                    // Torn final write from a crash mid-append
                    tracing::warn!(
                        target: "durable_fanout::providers",
                        instance_id = %instance,
                        error = %e,
                        "ignoring incomplete trailing history line"
                    );
                }
                Err(e) => {
                    return Err(ProviderError::permanent(
                        "read",
                        format!("{instance}: invalid history line {}: {e}", idx + 1),
                    ));
                }
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl Provider for FsProvider {
    fn name(&self) -> &str {
        "fs"
    }

    async fn create_instance(&self, info: InstanceInfo) -> Result<(), ProviderError> {
        let dir = self.inst_root("create_instance", &info.instance_id)?;
        let _guard = self.write_lock.lock().await;
        match fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ProviderError::already_exists("create_instance", &info.instance_id));
            }
            Err(e) => return Err(e.into()),
        }
        fs::write(dir.join(HISTORY_FILE), b"").await?;
        self.write_info(&dir, &info).await
    }

    async fn get_instance(&self, instance: &str) -> Result<Option<InstanceInfo>, ProviderError> {
        let dir = self.inst_root("get_instance", instance)?;
        self.read_info(&dir).await
    }

    async fn update_instance_status(
        &self,
        instance: &str,
        status: InstanceStatus,
        output: Option<String>,
    ) -> Result<(), ProviderError> {
        let dir = self.inst_root("update_instance_status", instance)?;
        let _guard = self.write_lock.lock().await;
        let mut info = self
            .read_info(&dir)
            .await?
            .ok_or_else(|| ProviderError::not_found("update_instance_status", instance))?;
        info.status = status;
        info.output = output;
        self.write_info(&dir, &info).await
    }

    async fn list_instances(&self) -> Result<Vec<String>, ProviderError> {
        let mut found: Vec<(u64, String)> = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(info) = self.read_info(&entry.path()).await? {
                found.push((info.created_at_ms, info.instance_id));
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, id)| id).collect())
    }

    async fn read(&self, instance: &str) -> Result<Vec<Event>, ProviderError> {
        let dir = self.inst_root("read", instance)?;
        self.read_history(&dir, instance).await
    }

    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), ProviderError> {
        let dir = self.inst_root("append", instance)?;
        let _guard = self.write_lock.lock().await;
        if !fs::try_exists(dir.join(INSTANCE_FILE)).await? {
            return Err(ProviderError::not_found("append", instance));
        }
        let existing = self.read_history(&dir, instance).await?;
        let kept = filter_duplicates(&existing, new_events);
        if kept.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for ev in &kept {
            let line = serde_json::to_string(ev).map_err(|e| ProviderError::permanent("append", e.to_string()))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(dir.join(HISTORY_FILE))
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_path_like_instance_ids() {
        let td = tempfile::tempdir().unwrap();
        let p = FsProvider::new(td.path(), false).await.unwrap();
        for bad in ["a/b", "..", "", "x\\y"] {
            let err = p.create_instance(InstanceInfo::new(bad, "O", "")).await.unwrap_err();
            assert!(!err.is_retryable(), "{bad}");
        }
    }

    #[tokio::test]
    async fn torn_trailing_line_is_ignored() {
        let td = tempfile::tempdir().unwrap();
        let p = FsProvider::new(td.path(), false).await.unwrap();
        p.create_instance(InstanceInfo::new("i1", "O", "")).await.unwrap();
        p.append(
            "i1",
            vec![Event::OrchestrationStarted {
                name: "O".into(),
                input: String::new(),
            }],
        )
        .await
        .unwrap();
        let path = td.path().join("i1").join(HISTORY_FILE);
        let mut data = std::fs::read_to_string(&path).unwrap();
        data.push_str(r#"{"type":"CallSche"#);
        std::fs::write(&path, data).unwrap();

        let hist = p.read("i1").await.unwrap();
        assert_eq!(hist.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_middle_line_is_an_error() {
        let td = tempfile::tempdir().unwrap();
        let p = FsProvider::new(td.path(), false).await.unwrap();
        p.create_instance(InstanceInfo::new("i1", "O", "")).await.unwrap();
        let path = td.path().join("i1").join(HISTORY_FILE);
        std::fs::write(&path, "garbage\n{\"type\":\"OrchestrationCompleted\",\"output\":\"x\"}\n").unwrap();
        assert!(p.read("i1").await.is_err());
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let td = tempfile::tempdir().unwrap();
        {
            let p = FsProvider::new(td.path(), false).await.unwrap();
            p.create_instance(InstanceInfo::new("i1", "O", "in")).await.unwrap();
            p.update_instance_status("i1", InstanceStatus::Running, None).await.unwrap();
        }
        let p = FsProvider::new(td.path(), false).await.unwrap();
        let info = p.get_instance("i1").await.unwrap().unwrap();
        assert_eq!(info.status, InstanceStatus::Running);
        assert_eq!(info.input, "in");

        let wiped = FsProvider::new(td.path(), true).await.unwrap();
        assert!(wiped.list_instances().await.unwrap().is_empty());
    }
}
