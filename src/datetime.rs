use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

#[cfg(not(test))]
/// 現在のUTC時間を取得する。
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// テスト時に利用するモック時間を取得する。
#[cfg(test)]
pub mod mock_datetime {
    use std::cell::RefCell;

    use super::DateTime;
    use super::Utc;

    thread_local! {
        static MOCK_TIME: RefCell<Option<DateTime<Utc>>> = RefCell::new(None);
    }

    pub fn now() -> DateTime<Utc> {
        MOCK_TIME.with(|cell| cell.borrow().as_ref().cloned().unwrap_or_else(Utc::now))
    }

    pub fn set_mock_time(time: DateTime<Utc>) {
        MOCK_TIME.with(|cell| *cell.borrow_mut() = Some(time));
    }

    pub fn clear_mock_time() {
        MOCK_TIME.with(|cell| *cell.borrow_mut() = None);
    }
}

#[cfg(test)]
pub use mock_datetime::now;

/// 指定したタイムゾーンの暦で`from`から`to`まで(両端を含む)の期間をUTCの半開区間で返す。
///
/// # Arguments
///
/// * `from` - 期間の最初の日
/// * `to` - 期間の最後の日
/// * `tz` - 暦として利用するタイムゾーン
pub fn local_range_bounds<Tz: TimeZone>(
    from: NaiveDate,
    to: NaiveDate,
    tz: &Tz,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let begin = start_of_day(from, tz)?;
    let end = start_of_day(to + Duration::days(1), tz)?;

    Ok((begin, end))
}

/// ローカル日付の00:00:00をUTCで返す。
fn start_of_day<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Result<DateTime<Utc>> {
    let naive_datetime = date
        .and_hms_opt(0, 0, 0)
        .context("Failed to set hour, minute, and second")?;
    let datetime = tz
        .from_local_datetime(&naive_datetime)
        .earliest()
        .with_context(|| format!("Failed to resolve local midnight of {}", date))?;

    Ok(datetime.with_timezone(&Utc))
}

/// `YYYY-MM-DD`形式の日付をパースする。
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("Failed to parse date: {}", s))
}
