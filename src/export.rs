use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use log::info;
#[cfg(test)]
use mockall::automock;
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::work_item::TaskAdjustment;

/// 調整結果を下流へ送り出す先。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AdjustmentSink: Send + Sync {
    async fn send(&self, adjustment: &TaskAdjustment) -> Result<()>;
}

/// 調整結果を1行1件のJSONとしてファイルに追記する。
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AdjustmentSink for JsonLinesSink {
    async fn send(&self, adjustment: &TaskAdjustment) -> Result<()> {
        let mut line =
            serde_json::to_string(adjustment).context("Failed to serialize adjustment")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        // tokioのFileはflushするまで書き込みの完了を保証しない。
        file.flush()
            .await
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;

        Ok(())
    }
}

/// 送り先が設定されていない場合に、調整結果をログに残す。
pub struct LogSink;

#[async_trait]
impl AdjustmentSink for LogSink {
    async fn send(&self, adjustment: &TaskAdjustment) -> Result<()> {
        info!(
            "Adjusted work item {} by {:+.2}h",
            adjustment.work_item_id, adjustment.delta_hours
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AdjustmentSink, JsonLinesSink};
    use crate::work_item::TaskAdjustment;

    /// `send`から戻った時点で、その行がファイルに書かれている。
    #[tokio::test]
    async fn test_json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adjustments.jsonl");
        let sink = JsonLinesSink::new(&path);

        sink.send(&TaskAdjustment {
            work_item_id: 1,
            delta_hours: 1.5,
        })
        .await
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{\"work_item_id\":1,\"delta_hours\":1.5}\n"
        );
        sink.send(&TaskAdjustment {
            work_item_id: 2,
            delta_hours: -0.25,
        })
        .await
        .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "{\"work_item_id\":1,\"delta_hours\":1.5}\n{\"work_item_id\":2,\"delta_hours\":-0.25}\n"
        );
    }

    #[tokio::test]
    async fn test_json_lines_sink_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("missing").join("out.jsonl"));

        let result = sink
            .send(&TaskAdjustment {
                work_item_id: 1,
                delta_hours: 1.0,
            })
            .await;

        assert!(result.is_err());
    }
}
