use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};

mod adjust;
mod cache;
mod comment;
mod config;
mod console;
mod datetime;
mod devops;
mod entry_command;
mod error;
mod export;
mod logger;
mod reorder;
mod sources;
mod standup_command;
mod summary;
mod time_entry;
mod time_range;
mod toggl;
mod work_item;

use adjust::Adjuster;
use config::Config;
use console::{ConsoleMarkdownList, ConsolePresenter};
use devops::DevOpsClient;
use entry_command::{EntryArgs, EntryCommand};
use export::{AdjustmentSink, JsonLinesSink, LogSink};
use reorder::Backlog;
use sources::Sources;
use standup_command::{StandupArgs, StandupCommand};
use toggl::TogglClient;
use work_item::Iteration;

/// Togglの作業記録とAzure DevOpsのwork itemを突き合わせるCLIアプリケーション。
///
/// # Examples
/// ```
/// $ cargo run -- standup --from 2024-06-03
/// $ cargo run -- adjust --id 42 --minutes -15
/// $ cargo run -- reorder --team core --iteration sprint-1 --ids 7,8 --after 3
/// ```
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Args {
    #[clap(short = 'v', long = "verbose", parse(from_occurrences), global = true)]
    verbose: u64,

    #[clap(subcommand)]
    subcommand: SubCommands,
}

/// サブコマンドを表す列挙型。
#[derive(Debug, Subcommand)]
enum SubCommands {
    /// 期間内の作業をstand-up用に集計して表示する。
    Standup(StandupArgs),
    /// taskの実績作業時間を分単位で増減する。
    Adjust {
        #[clap(long = "id")]
        id: u32,
        #[clap(long = "minutes", allow_hyphen_values = true)]
        minutes: i64,
    },
    /// iterationのbacklogでwork itemを並べ替える。
    Reorder {
        #[clap(long = "team")]
        team: String,
        #[clap(long = "iteration")]
        iteration: String,
        #[clap(long = "ids", use_value_delimiter = true, required = true)]
        ids: Vec<u32>,
        #[clap(long = "after", help = "Work item placed right before the moved ones")]
        after: Option<u32>,
        #[clap(long = "before", help = "Work item placed right after the moved ones")]
        before: Option<u32>,
    },
    /// time entryを1件書き換える。
    #[clap(subcommand)]
    Entry(EntryArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logger::init(args.verbose)?;

    let config = Config::load().context("Failed to load config")?;
    let devops = config.devops()?;
    let sources = Sources::new(
        TogglClient::new(config.toggl_api_token()?),
        DevOpsClient::new(devops.organization, devops.project, devops.token),
        config.cache_max_age(),
    );
    let mut stdout = std::io::stdout();
    let mut presenter = ConsoleMarkdownList::new(&mut stdout);

    match args.subcommand {
        SubCommands::Standup(standup) => {
            let summary = StandupCommand::new(&sources).run(standup).await?;
            presenter.show_standup(&summary)?;
        }
        SubCommands::Adjust { id, minutes } => {
            let sink: Box<dyn AdjustmentSink> = match &config.export_path {
                Some(path) => Box::new(JsonLinesSink::new(path)),
                None => Box::new(LogSink),
            };
            let outcome = Adjuster::new(sources.issues(), sink.as_ref())
                .adjust(id, Duration::minutes(minutes))
                .await
                .with_context(|| format!("Failed to adjust work item {}", id))?;
            presenter.show_adjustment(&outcome)?;
        }
        SubCommands::Reorder {
            team,
            iteration,
            ids,
            after,
            before,
        } => {
            let iteration = Iteration { team, id: iteration };
            let results = Backlog::new(sources.issues())
                .reorder(&iteration, &ids, after, before)
                .await
                .with_context(|| format!("Failed to reorder iteration {}", iteration.id))?;
            presenter.show_reorder(&results)?;
        }
        SubCommands::Entry(entry) => {
            let entry = EntryCommand::new(&sources).run(entry).await?;
            presenter.show_entry(&entry)?;
        }
    }

    Ok(())
}
