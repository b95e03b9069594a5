use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// 開始と、計測中であれば存在しない終了からなる時間範囲。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub begin: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(begin: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Self { begin, end }
    }

    /// 終了が開始より前であれば`InvalidInterval`を返す。
    pub fn validate(&self) -> Result<()> {
        match self.end {
            Some(end) if end < self.begin => Err(Error::InvalidInterval {
                begin: self.begin,
                end,
            }),
            _ => Ok(()),
        }
    }
}

/// 2つの時間範囲が重なっているかを返す。
///
/// 半開区間として比較するため、一方の終了と他方の開始が一致するだけでは重ならない。
/// どちらかが計測中(終了なし)であれば、常に重ならないものとする。
pub fn overlaps(a: &TimeRange, b: &TimeRange) -> Result<bool> {
    a.validate()?;
    b.validate()?;

    match (a.end, b.end) {
        (Some(a_end), Some(b_end)) => Ok(a.begin < b_end && b.begin < a_end),
        _ => Ok(false),
    }
}
