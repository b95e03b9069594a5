use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use crate::comment::{self, CommentType};
use crate::error::{Error, Result};
use crate::time_entry::{ActivityRef, ProjectRef, TimeEntry};
use crate::time_range::overlaps;
use crate::work_item::WorkItem;

/// 子孫のtime entryから集計した値。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rollup {
    pub total_time: Duration,
    /// 計測中のentryを1つでも含む。
    pub is_running: bool,
    /// 全てのentryがexport済み。
    pub all_exported: bool,
    /// 全てのentryが停止済みかつ未export。
    pub can_export: bool,
}

impl Rollup {
    fn of_entry(entry: &TimeEntry, now: DateTime<Utc>) -> Self {
        Self {
            total_time: entry.duration(now),
            is_running: entry.is_running(),
            all_exported: entry.exported,
            can_export: entry.can_export(),
        }
    }

    fn combine<I: IntoIterator<Item = Rollup>>(parts: I) -> Self {
        parts.into_iter().fold(
            Self {
                total_time: Duration::zero(),
                is_running: false,
                all_exported: true,
                can_export: true,
            },
            |acc, part| Self {
                total_time: acc.total_time + part.total_time,
                is_running: acc.is_running || part.is_running,
                all_exported: acc.all_exported && part.all_exported,
                can_export: acc.can_export && part.can_export,
            },
        )
    }
}

/// 1つのtask(または未割り当て)に紐づくentryのまとまり。
#[derive(Clone, Debug, PartialEq)]
pub struct TaskSummary {
    /// 説明文でwork itemを参照していないentryは`None`にまとめる。
    pub task: Option<WorkItem>,
    pub entries: Vec<TimeEntry>,
    pub accomplishments: Option<String>,
    pub impediments: Option<String>,
    pub learnings: Option<String>,
    pub other_comments: Option<String>,
    /// 紐づくwork itemに当初見積もりがない。
    pub needs_estimate: bool,
    pub rollup: Rollup,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ActivitySummary {
    pub activity: ActivityRef,
    pub tasks: Vec<TaskSummary>,
    pub rollup: Rollup,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectSummary {
    pub project: ProjectRef,
    pub activities: Vec<ActivitySummary>,
    pub rollup: Rollup,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub projects: Vec<ProjectSummary>,
    pub rollup: Rollup,
}

/// stand-upの集計結果の根。
#[derive(Clone, Debug, PartialEq)]
pub struct PeriodSummary {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub days: Vec<DaySummary>,
    pub rollup: Rollup,
}

/// 集計木の各階層を共通に扱うための参照。
#[derive(Clone, Copy, Debug)]
pub enum SummaryNode<'a> {
    Period(&'a PeriodSummary),
    Day(&'a DaySummary),
    Project(&'a ProjectSummary),
    Activity(&'a ActivitySummary),
    Task(&'a TaskSummary),
}

impl<'a> SummaryNode<'a> {
    pub fn rollup(&self) -> &'a Rollup {
        match *self {
            SummaryNode::Period(node) => &node.rollup,
            SummaryNode::Day(node) => &node.rollup,
            SummaryNode::Project(node) => &node.rollup,
            SummaryNode::Activity(node) => &node.rollup,
            SummaryNode::Task(node) => &node.rollup,
        }
    }

    pub fn children(&self) -> Vec<SummaryNode<'a>> {
        match *self {
            SummaryNode::Period(node) => node.days.iter().map(SummaryNode::Day).collect(),
            SummaryNode::Day(node) => node.projects.iter().map(SummaryNode::Project).collect(),
            SummaryNode::Project(node) => {
                node.activities.iter().map(SummaryNode::Activity).collect()
            }
            SummaryNode::Activity(node) => node.tasks.iter().map(SummaryNode::Task).collect(),
            SummaryNode::Task(_) => Vec::new(),
        }
    }

    pub fn label(&self) -> String {
        match *self {
            SummaryNode::Period(node) => format!("{} ~ {}", node.from, node.to),
            SummaryNode::Day(node) => node.date.to_string(),
            SummaryNode::Project(node) => node.project.name.clone(),
            SummaryNode::Activity(node) => node.activity.name.clone(),
            SummaryNode::Task(node) => match &node.task {
                Some(task) => format!("D#{} {}", task.id, task.title),
                None => "(unassigned)".to_string(),
            },
        }
    }
}

/// キーごとにentryをまとめる。まとまりは最も早い開始時刻の順に並べ、同時刻ならキーの順とする。
///
/// `entries`は開始時刻の順に並んでいること。
fn group_by<K, F>(entries: Vec<TimeEntry>, key: F) -> Vec<(K, Vec<TimeEntry>)>
where
    K: Ord,
    F: Fn(&TimeEntry) -> K,
{
    let mut groups: BTreeMap<K, Vec<TimeEntry>> = BTreeMap::new();
    for entry in entries {
        groups.entry(key(&entry)).or_default().push(entry);
    }

    let mut groups: Vec<(K, Vec<TimeEntry>)> = groups.into_iter().collect();
    groups.sort_by(|(a_key, a), (b_key, b)| {
        let a_begin = a.first().map(|entry| entry.begin);
        let b_begin = b.first().map(|entry| entry.begin);
        a_begin.cmp(&b_begin).then_with(|| a_key.cmp(b_key))
    });
    groups
}

fn local_date<Tz: TimeZone>(entry: &TimeEntry, tz: &Tz) -> NaiveDate {
    entry.begin.with_timezone(tz).date_naive()
}

/// 同じユーザーの同じ日のentryで、他と重なっているものに印を付ける。
fn flag_overlaps<Tz: TimeZone>(entries: &mut [TimeEntry], tz: &Tz) -> Result<()> {
    let days: Vec<NaiveDate> = entries.iter().map(|entry| local_date(entry, tz)).collect();
    let mut flags = vec![false; entries.len()];

    for i in 0..entries.len() {
        entries[i].range().validate()?;
        for j in (i + 1)..entries.len() {
            if entries[i].user_id != entries[j].user_id || days[i] != days[j] {
                continue;
            }
            if overlaps(&entries[i].range(), &entries[j].range())? {
                flags[i] = true;
                flags[j] = true;
            }
        }
    }

    for (entry, flag) in entries.iter_mut().zip(flags) {
        entry.is_overlapping = flag;
    }
    Ok(())
}

fn build_task(
    task: Option<WorkItem>,
    entries: Vec<TimeEntry>,
    now: DateTime<Utc>,
) -> TaskSummary {
    let description = entries
        .iter()
        .map(|entry| entry.description.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let comments = comment::classify(&description);
    let joined = |wanted: CommentType| comment::join(&comments, |t| t == wanted);

    TaskSummary {
        needs_estimate: task
            .as_ref()
            .map_or(false, |task| task.original_estimate.is_none()),
        accomplishments: joined(CommentType::Accomplishment),
        impediments: joined(CommentType::Impediment),
        learnings: joined(CommentType::Learning),
        other_comments: joined(CommentType::Other),
        rollup: Rollup::combine(entries.iter().map(|entry| Rollup::of_entry(entry, now))),
        task,
        entries,
    }
}

fn build_activity(
    activity: ActivityRef,
    entries: Vec<TimeEntry>,
    work_items: &HashMap<u32, &WorkItem>,
    now: DateTime<Utc>,
) -> ActivitySummary {
    let tasks: Vec<TaskSummary> = group_by(entries, |entry| entry.linked_task)
        .into_iter()
        .map(|(task_id, entries)| {
            let task = task_id.and_then(|id| work_items.get(&id).map(|item| (*item).clone()));
            build_task(task, entries, now)
        })
        .collect();

    ActivitySummary {
        activity,
        rollup: Rollup::combine(tasks.iter().map(|task| task.rollup)),
        tasks,
    }
}

fn build_project(
    project: ProjectRef,
    entries: Vec<TimeEntry>,
    work_items: &HashMap<u32, &WorkItem>,
    now: DateTime<Utc>,
) -> ProjectSummary {
    let activities: Vec<ActivitySummary> = group_by(entries, |entry| entry.activity.clone())
        .into_iter()
        .map(|(activity, entries)| build_activity(activity, entries, work_items, now))
        .collect();

    ProjectSummary {
        project,
        rollup: Rollup::combine(activities.iter().map(|activity| activity.rollup)),
        activities,
    }
}

/// time entryとwork itemからstand-upの集計木を作る。
///
/// `from`から`to`まで(両端を含む)の`tz`の暦で日を分け、日→プロジェクト→activity→taskの順にまとめる。
/// 計測中のentryの作業時間は`now`までとする。同じ入力と`now`からは常に同じ木ができる。
///
/// # Arguments
///
/// * `from` - 期間の最初の日
/// * `to` - 期間の最後の日
/// * `entries` - 集計するtime entry
/// * `work_items` - entryの説明文から参照されるwork item
/// * `tz` - 日を分けるためのタイムゾーン
/// * `now` - 計測中のentryの終了とみなす時刻
///
/// # Errors
///
/// 参照されたwork itemが`work_items`にない場合は`NotFound`、
/// 終了が開始より前のentryがある場合は`InvalidInterval`を返す。
pub fn build<Tz: TimeZone>(
    from: NaiveDate,
    to: NaiveDate,
    entries: Vec<TimeEntry>,
    work_items: &[WorkItem],
    tz: &Tz,
    now: DateTime<Utc>,
) -> Result<PeriodSummary> {
    let work_items: HashMap<u32, &WorkItem> =
        work_items.iter().map(|item| (item.id, item)).collect();

    let mut entries: Vec<TimeEntry> = entries
        .into_iter()
        .filter(|entry| (from..=to).contains(&local_date(entry, tz)))
        .map(|mut entry| {
            entry.linked_task = entry.referenced_work_item();
            match entry.linked_task {
                Some(id) if !work_items.contains_key(&id) => {
                    Err(Error::NotFound(format!("work item {}", id)))
                }
                _ => Ok(entry),
            }
        })
        .collect::<Result<_>>()?;
    entries.sort_by(|a, b| a.begin.cmp(&b.begin).then_with(|| a.id.cmp(&b.id)));
    flag_overlaps(&mut entries, tz)?;

    let days: Vec<DaySummary> = group_by(entries, |entry| local_date(entry, tz))
        .into_iter()
        .map(|(date, entries)| {
            let projects: Vec<ProjectSummary> = group_by(entries, |entry| entry.project.clone())
                .into_iter()
                .map(|(project, entries)| build_project(project, entries, &work_items, now))
                .collect();
            DaySummary {
                date,
                rollup: Rollup::combine(projects.iter().map(|project| project.rollup)),
                projects,
            }
        })
        .collect();

    Ok(PeriodSummary {
        from,
        to,
        rollup: Rollup::combine(days.iter().map(|day| day.rollup)),
        days,
    })
}
