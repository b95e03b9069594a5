use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, TimeZone};
use log::info;

use crate::cache::CacheMode;
use crate::datetime::{self, local_range_bounds, parse_date};
use crate::devops::IssueTracker;
use crate::sources::Sources;
use crate::summary::{self, PeriodSummary};
use crate::time_entry::{EntryFilter, TimeEntry};
use crate::toggl::TimeTracking;

/// `standup`サブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct StandupArgs {
    #[clap(
        short = 'f',
        long = "from",
        help = "First day of the stand-up in the format YYYY-MM-DD (defaults to --to)",
        parse(try_from_str = parse_date),
    )]
    from: Option<NaiveDate>,

    #[clap(
        short = 't',
        long = "to",
        help = "Last day of the stand-up in the format YYYY-MM-DD (defaults to today)",
        parse(try_from_str = parse_date),
    )]
    to: Option<NaiveDate>,

    #[clap(long = "refresh", help = "Ignore cached upstream data")]
    refresh: bool,
}

pub struct StandupCommand<'a, T, I> {
    sources: &'a Sources<T, I>,
}

impl<'a, T: TimeTracking, I: IssueTracker> StandupCommand<'a, T, I> {
    /// 新しい`StandupCommand`を返す。
    ///
    /// # Arguments
    /// * `sources` - time entryとwork itemの取得元
    pub fn new(sources: &'a Sources<T, I>) -> Self {
        Self { sources }
    }

    /// Localタイムゾーンの暦で`standup`サブコマンドの処理を行う。
    pub async fn run(&self, args: StandupArgs) -> Result<PeriodSummary> {
        self.run_in(args, &Local).await
    }

    /// `standup`サブコマンドの処理を行う。
    ///
    /// 指定された期間の自分のtime entryと、その説明文から参照されるwork itemを取得して集計する。
    /// 日付が指定されていない場合は、`tz`での今日を利用する。
    pub async fn run_in<Tz: TimeZone>(&self, args: StandupArgs, tz: &Tz) -> Result<PeriodSummary> {
        let today = datetime::now().with_timezone(tz).date_naive();
        let to = args.to.unwrap_or(today);
        let from = args.from.unwrap_or(to);
        if from > to {
            bail!("--from {} is after --to {}", from, to);
        }
        let mode = if args.refresh {
            CacheMode::ForceRefresh
        } else {
            CacheMode::UseCache
        };

        let user = self
            .sources
            .current_user(mode)
            .await
            .context("Failed to read current user")?;
        let (begin, end) = local_range_bounds(from, to, tz)?;
        info!(
            "Building stand-up for {}. Start at: {}, End at: {}",
            user.name, begin, end
        );

        let entries: Vec<TimeEntry> = self
            .sources
            .entries(&EntryFilter::between(begin, end), mode)
            .await
            .context("Failed to retrieve time entries")?
            .into_iter()
            .filter(|entry| entry.user_id == user.id)
            .collect();
        let ids: Vec<u32> = entries
            .iter()
            .filter_map(TimeEntry::referenced_work_item)
            .collect();
        let work_items = self
            .sources
            .work_items(&ids, mode)
            .await
            .context("Failed to retrieve work items")?;
        info!(
            "Retrieved {} time entries and {} work items",
            entries.len(),
            work_items.len()
        );

        let summary = summary::build(from, to, entries, &work_items, tz, datetime::now())
            .context("Failed to build stand-up")?;

        Ok(summary)
    }
}
