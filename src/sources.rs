use std::time::Duration;

use log::info;

use crate::cache::{Cache, CacheMap, CacheMode};
use crate::devops::IssueTracker;
use crate::error::Result;
use crate::time_entry::{EntryFilter, TimeEntry, User};
use crate::toggl::TimeTracking;
use crate::work_item::WorkItem;

/// time trackingとissue trackerを、それぞれの読み込みをキャッシュした上で束ねる。
///
/// キャッシュはこの値が所有するため、利用者ごとに寿命を明示して持ち回る。
pub struct Sources<T, I> {
    time_tracking: T,
    issues: I,
    current_user: Cache<User>,
    entries: CacheMap<EntryFilter, Vec<TimeEntry>>,
    work_items: CacheMap<Vec<u32>, Vec<WorkItem>>,
}

impl<T: TimeTracking, I: IssueTracker> Sources<T, I> {
    /// # Arguments
    ///
    /// * `time_tracking` - time trackingサービスのクライアント
    /// * `issues` - issue trackerのクライアント
    /// * `max_age` - 各キャッシュの有効期間
    pub fn new(time_tracking: T, issues: I, max_age: Duration) -> Self {
        Self {
            time_tracking,
            issues,
            current_user: Cache::with_max_age(max_age),
            entries: CacheMap::with_max_age(max_age),
            work_items: CacheMap::with_max_age(max_age),
        }
    }

    pub fn time_tracking(&self) -> &T {
        &self.time_tracking
    }

    pub fn issues(&self) -> &I {
        &self.issues
    }

    pub async fn current_user(&self, mode: CacheMode) -> Result<User> {
        self.current_user
            .get_value(mode, || self.time_tracking.current_user())
            .await
    }

    pub async fn entries(&self, filter: &EntryFilter, mode: CacheMode) -> Result<Vec<TimeEntry>> {
        self.entries
            .get_value(filter.clone(), mode, || {
                info!("Fetching time entries for {:?}", filter);
                self.time_tracking.list_entries(filter)
            })
            .await
    }

    /// work itemをまとめて取得する。同じ番号の組み合わせであれば順序によらず同じキャッシュを使う。
    pub async fn work_items(&self, ids: &[u32], mode: CacheMode) -> Result<Vec<WorkItem>> {
        let mut key = ids.to_vec();
        key.sort_unstable();
        key.dedup();
        if key.is_empty() {
            return Ok(Vec::new());
        }

        let fetch_ids = key.clone();
        self.work_items
            .get_value(key, mode, || async move {
                info!("Fetching work items {:?}", fetch_ids);
                self.issues.get_work_items(&fetch_ids).await
            })
            .await
    }

    /// 上流へ書き込んだ後に呼び、以降の読み込みを取得し直させる。
    pub async fn invalidate(&self) {
        self.current_user.invalidate().await;
        self.entries.invalidate_all().await;
        self.work_items.invalidate_all().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Sources;
    use crate::cache::CacheMode;
    use crate::devops::MockIssueTracker;
    use crate::time_entry::{EntryFilter, User};
    use crate::toggl::MockTimeTracking;
    use crate::work_item::test_support::task;

    fn user() -> User {
        User {
            id: 1,
            name: "Alex".to_string(),
            workspace_id: 2,
        }
    }

    #[tokio::test]
    async fn test_current_user_is_cached_until_invalidated() {
        let mut time_tracking = MockTimeTracking::new();
        time_tracking
            .expect_current_user()
            .times(2)
            .returning(|| Ok(user()));
        let sources = Sources::new(
            time_tracking,
            MockIssueTracker::new(),
            Duration::from_secs(60),
        );

        sources.current_user(CacheMode::UseCache).await.unwrap();
        sources.current_user(CacheMode::UseCache).await.unwrap();
        sources.invalidate().await;
        let again = sources.current_user(CacheMode::UseCache).await.unwrap();

        assert_eq!(again, user());
    }

    #[tokio::test]
    async fn test_entries_are_cached_per_filter() {
        let mut time_tracking = MockTimeTracking::new();
        time_tracking
            .expect_list_entries()
            .times(2)
            .returning(|_| Ok(vec![]));
        let sources = Sources::new(
            time_tracking,
            MockIssueTracker::new(),
            Duration::from_secs(60),
        );
        let running = EntryFilter {
            running_only: true,
            ..EntryFilter::default()
        };

        sources
            .entries(&EntryFilter::default(), CacheMode::UseCache)
            .await
            .unwrap();
        sources
            .entries(&EntryFilter::default(), CacheMode::UseCache)
            .await
            .unwrap();
        sources.entries(&running, CacheMode::UseCache).await.unwrap();
    }

    #[tokio::test]
    async fn test_work_items_key_ignores_order_and_duplicates() {
        let mut issues = MockIssueTracker::new();
        issues
            .expect_get_work_items()
            .withf(|ids| ids.to_vec() == vec![1u32, 2])
            .times(1)
            .returning(|ids| Ok(ids.iter().map(|id| task(*id)).collect()));
        let sources = Sources::new(MockTimeTracking::new(), issues, Duration::from_secs(60));

        let first = sources
            .work_items(&[2, 1, 2], CacheMode::UseCache)
            .await
            .unwrap();
        let second = sources
            .work_items(&[1, 2], CacheMode::UseCache)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert!(sources
            .work_items(&[], CacheMode::UseCache)
            .await
            .unwrap()
            .is_empty());
    }
}
