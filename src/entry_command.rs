use anyhow::{Context, Result};
use log::info;

use crate::devops::IssueTracker;
use crate::error::Error;
use crate::sources::Sources;
use crate::time_entry::TimeEntry;
use crate::toggl::TimeTracking;

/// time entryを1件書き換えるためのサブコマンド。
#[derive(Debug, clap::Subcommand)]
pub enum EntryArgs {
    /// 計測中のtime entryを止める。
    Stop {
        #[clap(long = "id")]
        id: i64,
    },
    /// time entryの説明文を置き換える。
    Describe {
        #[clap(long = "id")]
        id: i64,
        #[clap(long = "text")]
        text: String,
    },
    /// 停止済みで未出力のtime entryに出力済みの印を付ける。
    Export {
        #[clap(long = "id")]
        id: i64,
    },
}

pub struct EntryCommand<'a, T, I> {
    sources: &'a Sources<T, I>,
}

impl<'a, T: TimeTracking, I: IssueTracker> EntryCommand<'a, T, I> {
    pub fn new(sources: &'a Sources<T, I>) -> Self {
        Self { sources }
    }

    /// `entry`サブコマンドの処理を行い、書き換えた後のtime entryを返す。
    ///
    /// 書き換えた後はキャッシュを捨てるので、続くstand-upには変更が反映される。
    pub async fn run(&self, args: EntryArgs) -> Result<TimeEntry> {
        let time_tracking = self.sources.time_tracking();
        let entry = match args {
            EntryArgs::Stop { id } => time_tracking
                .stop(id)
                .await
                .with_context(|| format!("Failed to stop time entry {}", id))?,
            EntryArgs::Describe { id, text } => time_tracking
                .set_description(id, &text)
                .await
                .with_context(|| format!("Failed to update time entry {}", id))?,
            EntryArgs::Export { id } => {
                let current = time_tracking
                    .get_entry(id)
                    .await
                    .with_context(|| format!("Failed to read time entry {}", id))?;
                if !current.can_export() {
                    return Err(Error::InvalidOperation(format!(
                        "time entry {} must be stopped and not yet exported",
                        id
                    ))
                    .into());
                }
                time_tracking
                    .export(id)
                    .await
                    .with_context(|| format!("Failed to export time entry {}", id))?
            }
        };
        self.sources.invalidate().await;
        info!("Updated time entry {}", entry.id);

        Ok(entry)
    }
}
