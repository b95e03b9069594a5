use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// キャッシュの既定の有効期間。
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60);

/// キャッシュの読み方。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheMode {
    /// 有効期間内であれば保持している値を返す。
    UseCache,
    /// 有効期間に関わらず取得し直す。
    ForceRefresh,
}

struct Slot<T> {
    value: Option<T>,
    fetched_at: Option<Instant>,
    last_failure: Option<Error>,
}

impl<T: Clone> Slot<T> {
    fn fresh_value(&self, max_age: Duration) -> Option<T> {
        match (&self.value, self.fetched_at) {
            (Some(value), Some(fetched_at)) if Instant::now() < fetched_at + max_age => {
                Some(value.clone())
            }
            _ => None,
        }
    }
}

/// 高コストな取得処理の結果を一定時間保持するキャッシュ。
///
/// 期限切れのキャッシュに同時に複数の呼び出しがあっても、上流への取得は1回だけ行われる。
/// 待機していた呼び出しは、その取得結果(失敗を含む)を受け取る。
pub struct Cache<T> {
    max_age: Duration,
    slot: Mutex<Slot<T>>,
    // slotのロック中にだけ増える。ロック待ちの前に読んでおき、待っている間の更新を検出する。
    refreshes: AtomicU64,
    failures: AtomicU64,
}

impl<T: Clone> Cache<T> {
    /// 既定の有効期間(1分)で新しい`Cache`を返す。
    pub fn new() -> Self {
        Self::with_max_age(DEFAULT_MAX_AGE)
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            max_age,
            slot: Mutex::new(Slot {
                value: None,
                fetched_at: None,
                last_failure: None,
            }),
            refreshes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// 値を返す。期限切れ、または`ForceRefresh`の場合は`fetch`で取得し直す。
    ///
    /// # Arguments
    ///
    /// * `mode` - キャッシュの読み方
    /// * `fetch` - 上流から値を取得する処理。取得が必要な場合にのみ呼ばれる
    pub async fn get_value<F, Fut>(&self, mode: CacheMode, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let seen_refreshes = self.refreshes.load(Ordering::SeqCst);
        let seen_failures = self.failures.load(Ordering::SeqCst);

        let mut slot = self.slot.lock().await;

        if mode == CacheMode::UseCache {
            if let Some(value) = slot.fresh_value(self.max_age) {
                debug!("Cache hit");
                return Ok(value);
            }
        }
        // 待っている間に他の呼び出しが取得を終えていれば、その結果を共有する。
        if self.refreshes.load(Ordering::SeqCst) != seen_refreshes {
            if let Some(value) = slot.value.clone() {
                return Ok(value);
            }
        }
        if self.failures.load(Ordering::SeqCst) != seen_failures {
            if let Some(err) = slot.last_failure.clone() {
                return Err(err);
            }
        }

        debug!("Cache miss, fetching");
        match fetch().await {
            Ok(value) => {
                slot.value = Some(value.clone());
                slot.fetched_at = Some(Instant::now());
                slot.last_failure = None;
                self.refreshes.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
            Err(err) => {
                slot.last_failure = Some(err.clone());
                self.failures.fetch_add(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// 保持している値を破棄し、次の呼び出しで取得し直すようにする。
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        slot.value = None;
        slot.fetched_at = None;
    }
}

impl<T: Clone> Default for Cache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// キーごとに`Cache`を持つキャッシュ。
///
/// 各キーのキャッシュは同じ有効期間で初回利用時に作成される。
pub struct CacheMap<K, T> {
    max_age: Duration,
    caches: Mutex<HashMap<K, Arc<Cache<T>>>>,
}

impl<K: Eq + Hash, T: Clone> CacheMap<K, T> {
    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            max_age,
            caches: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_value<F, Fut>(&self, key: K, mode: CacheMode, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cache = {
            let mut caches = self.caches.lock().await;
            caches
                .entry(key)
                .or_insert_with(|| Arc::new(Cache::with_max_age(self.max_age)))
                .clone()
        };

        cache.get_value(mode, fetch).await
    }

    pub async fn invalidate_all(&self) {
        self.caches.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::{Cache, CacheMap, CacheMode};
    use crate::error::{Error, Result};

    /// 呼ばれた回数を数え、少し待ってから値を返す取得処理。
    async fn counted_fetch(counter: &AtomicUsize, value: u32) -> Result<u32> {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(value)
    }

    async fn failing_fetch(counter: &AtomicUsize) -> Result<u32> {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Err(Error::UpstreamFailure("boom".to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache = Cache::with_max_age(Duration::from_secs(60));
        let counter = AtomicUsize::new(0);

        let (first, second) = tokio::join!(
            cache.get_value(CacheMode::UseCache, || counted_fetch(&counter, 1)),
            cache.get_value(CacheMode::UseCache, || counted_fetch(&counter, 2)),
        );

        assert_eq!(first.unwrap(), 1);
        assert_eq!(second.unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let third = cache
            .get_value(CacheMode::UseCache, || counted_fetch(&counter, 3))
            .await;

        assert_eq!(third.unwrap(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_value_is_returned_without_fetch() {
        let cache = Cache::new();
        let counter = AtomicUsize::new(0);

        cache
            .get_value(CacheMode::UseCache, || counted_fetch(&counter, 1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        let value = cache
            .get_value(CacheMode::UseCache, || counted_fetch(&counter, 2))
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_fetches_even_when_fresh() {
        let cache = Cache::new();
        let counter = AtomicUsize::new(0);

        cache
            .get_value(CacheMode::UseCache, || counted_fetch(&counter, 1))
            .await
            .unwrap();
        let value = cache
            .get_value(CacheMode::ForceRefresh, || counted_fetch(&counter, 2))
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    /// 取得の失敗は待機中の呼び出しにも伝わり、次の呼び出しで再取得される。
    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_waiters_and_next_call_retries() {
        let cache: Cache<u32> = Cache::new();
        let counter = AtomicUsize::new(0);

        let (first, second) = tokio::join!(
            cache.get_value(CacheMode::UseCache, || failing_fetch(&counter)),
            cache.get_value(CacheMode::UseCache, || counted_fetch(&counter, 2)),
        );

        let expected = Error::UpstreamFailure("boom".to_string());
        assert_eq!(first.unwrap_err(), expected);
        assert_eq!(second.unwrap_err(), expected);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let retried = cache
            .get_value(CacheMode::UseCache, || counted_fetch(&counter, 3))
            .await;

        assert_eq!(retried.unwrap(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    /// キャンセルされた取得はキャッシュを更新済みにしない。
    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_rearms_cache() {
        let cache = Cache::new();
        let counter = AtomicUsize::new(0);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(1),
            cache.get_value(CacheMode::UseCache, || counted_fetch(&counter, 1)),
        )
        .await;
        assert!(cancelled.is_err());

        let value = cache
            .get_value(CacheMode::UseCache, || counted_fetch(&counter, 2))
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_next_fetch() {
        let cache = Cache::new();
        let counter = AtomicUsize::new(0);

        cache
            .get_value(CacheMode::UseCache, || counted_fetch(&counter, 1))
            .await
            .unwrap();
        cache.invalidate().await;
        let value = cache
            .get_value(CacheMode::UseCache, || counted_fetch(&counter, 2))
            .await
            .unwrap();

        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_map_keeps_keys_apart() {
        let caches = CacheMap::with_max_age(Duration::from_secs(60));
        let counter = AtomicUsize::new(0);

        let a = caches
            .get_value("a", CacheMode::UseCache, || counted_fetch(&counter, 1))
            .await
            .unwrap();
        let b = caches
            .get_value("b", CacheMode::UseCache, || counted_fetch(&counter, 2))
            .await
            .unwrap();
        let a_again = caches
            .get_value("a", CacheMode::UseCache, || counted_fetch(&counter, 3))
            .await
            .unwrap();

        assert_eq!((a, b, a_again), (1, 2, 1));
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        caches.invalidate_all().await;
        let refreshed = caches
            .get_value("a", CacheMode::UseCache, || counted_fetch(&counter, 4))
            .await
            .unwrap();
        assert_eq!(refreshed, 4);
    }
}
