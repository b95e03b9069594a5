use chrono::{DateTime, Utc};
use thiserror::Error;

/// stand-up処理全体で扱うエラー。
///
/// キャッシュの取得失敗を待機中の全呼び出し元へ渡すため`Clone`を実装する。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// 参照先が上流に存在しない。
    #[error("Not found: {0}")]
    NotFound(String),

    /// 前提条件を満たさない操作。
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// 終了が開始より前の時間範囲。
    #[error("Invalid interval: end {end} is before begin {begin}")]
    InvalidInterval {
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// 楽観的排他制御でrevisionが一致しなかった。
    #[error("Concurrency conflict on work item {id}: revision {expected_revision} is stale")]
    ConcurrencyConflict { id: u32, expected_revision: u32 },

    /// 通信やデシリアライズなど上流側の失敗。
    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::UpstreamFailure(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
