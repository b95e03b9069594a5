use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::comment;
use crate::time_range::TimeRange;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: i64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityRef {
    pub id: String,
    pub name: String,
}

/// time trackingサービスのユーザー。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub workspace_id: i64,
}

/// 1件の作業記録。
#[derive(Clone, Debug, PartialEq)]
pub struct TimeEntry {
    pub id: i64,
    pub user_id: i64,
    pub project: ProjectRef,
    pub activity: ActivityRef,
    pub begin: DateTime<Utc>,
    /// 計測中であれば`None`。
    pub end: Option<DateTime<Utc>>,
    pub description: String,
    pub exported: bool,
    /// 集計時に同じユーザーの同じ日の他のentryと重なっていれば立てる。
    pub is_overlapping: bool,
    /// 説明文から解決したwork item。集計時に設定する。
    pub linked_task: Option<u32>,
}

impl TimeEntry {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.begin, self.end)
    }

    pub fn is_running(&self) -> bool {
        self.end.is_none()
    }

    /// 停止済みかつ未exportであれば、新しくexportできる。
    pub fn can_export(&self) -> bool {
        !self.is_running() && !self.exported
    }

    /// 作業時間を返す。計測中のentryは`now`までの時間とする。
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        let end = self.end.unwrap_or(now);
        (end - self.begin).max(Duration::zero())
    }

    /// 説明文の最初のwork item参照を返す。
    pub fn referenced_work_item(&self) -> Option<u32> {
        comment::classify(&self.description)
            .iter()
            .find_map(|comment| comment.linked_work_item())
    }
}

/// time entryの検索条件。
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EntryFilter {
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub running_only: bool,
    pub stopped_only: bool,
    pub search: Option<String>,
    /// 1始まりのページ番号。
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl EntryFilter {
    pub fn between(begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            begin: Some(begin),
            end: Some(end),
            ..Self::default()
        }
    }

    /// 日時の範囲以外の条件でentryを絞り込み、ページングする。
    pub fn apply(&self, entries: Vec<TimeEntry>) -> Vec<TimeEntry> {
        let search = self.search.as_ref().map(|s| s.to_lowercase());
        let filtered = entries.into_iter().filter(|entry| {
            (!self.running_only || entry.is_running())
                && (!self.stopped_only || !entry.is_running())
                && search
                    .as_ref()
                    .map_or(true, |s| entry.description.to_lowercase().contains(s))
        });

        match self.page_size {
            Some(size) => {
                let page = self.page.unwrap_or(1).max(1);
                filtered.skip((page - 1) * size).take(size).collect()
            }
            None => filtered.collect(),
        }
    }
}
