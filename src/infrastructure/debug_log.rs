use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only JSON-lines file for upstream anomalies worth inspecting later
#[derive(Debug)]
pub struct DebugLog {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl DebugLog {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            path: Some(log_dir.join("debug.jsonl")),
            write_lock: Mutex::new(()),
        }
    }

    /// A log that discards every entry
    pub fn disabled() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends `entry` with a `when` timestamp. Failures are logged, never returned.
    pub async fn record(&self, mut entry: Value) {
        let Some(path) = &self.path else {
            return;
        };

        if let Value::Object(map) = &mut entry {
            map.entry("when")
                .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        }

        let mut line = entry.to_string();
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let result = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to write debug dump to {}: {}", path.display(), e);
        }
    }
}
