use std::io::Write;

use anyhow::{Context, Result};
use chrono::Local;

use crate::adjust::AdjustOutcome;
use crate::reorder::ReorderResult;
use crate::summary::{PeriodSummary, Rollup, SummaryNode, TaskSummary};
use crate::time_entry::TimeEntry;

/// Consoleにstand-upの集計結果を表示するためのtrait。
pub trait ConsolePresenter {
    /// 集計結果を表示する。
    ///
    /// # Arguments
    ///
    /// * `summary` - 表示する集計結果
    fn show_standup(&mut self, summary: &PeriodSummary) -> Result<()>;

    fn show_entry(&mut self, entry: &TimeEntry) -> Result<()>;

    /// 作業時間の調整結果を表示する。
    fn show_adjustment(&mut self, outcome: &AdjustOutcome) -> Result<()>;

    fn show_reorder(&mut self, results: &[ReorderResult]) -> Result<()>;
}

/// 集計結果をMarkdownの見出しとlist形式で表示する。
pub struct ConsoleMarkdownList<'a, W: Write> {
    writer: &'a mut W,
}

impl<'a, W: Write> ConsoleMarkdownList<'a, W> {
    /// 新しい`ConsoleMarkdownList`を返す。
    pub fn new(writer: &'a mut W) -> Self {
        Self { writer }
    }

    fn write_node(&mut self, node: SummaryNode, depth: usize) -> Result<()> {
        let title = format!("{} {}", node.label(), describe(node.rollup()));
        let written = match depth {
            0 => writeln!(self.writer, "# {}", title),
            1 => writeln!(self.writer, "\n## {}", title),
            _ => writeln!(self.writer, "{}- {}", "  ".repeat(depth - 2), title),
        };
        written.with_context(|| format!("Failed to write summary node: {}", node.label()))?;

        if let SummaryNode::Task(task) = node {
            self.write_task_details(task, depth - 1)?;
        }
        for child in node.children() {
            self.write_node(child, depth + 1)?;
        }

        Ok(())
    }

    fn write_task_details(&mut self, task: &TaskSummary, depth: usize) -> Result<()> {
        let indent = "  ".repeat(depth);
        if task.needs_estimate {
            writeln!(self.writer, "{}- needs estimate", indent)?;
        }
        let narratives = [
            ("Accomplishments", &task.accomplishments),
            ("Impediments", &task.impediments),
            ("Learnings", &task.learnings),
            ("Other", &task.other_comments),
        ];
        for (name, text) in narratives {
            if let Some(text) = text {
                writeln!(self.writer, "{}- {}: {}", indent, name, text.replace('\n', "; "))?;
            }
        }
        for entry in &task.entries {
            writeln!(self.writer, "{}- {}", indent, entry_line(entry))
                .with_context(|| format!("Failed to write time entry: {:?}", entry))?;
        }

        Ok(())
    }
}

impl<'a, W: Write> ConsolePresenter for ConsoleMarkdownList<'a, W> {
    fn show_standup(&mut self, summary: &PeriodSummary) -> Result<()> {
        let node = SummaryNode::Period(summary);
        if summary.days.is_empty() {
            writeln!(self.writer, "# {} (no entries)", node.label())
                .context("Failed to write summary")?;
            return Ok(());
        }

        self.write_node(node, 0)
    }

    fn show_entry(&mut self, entry: &TimeEntry) -> Result<()> {
        let exported = if entry.exported { " (exported)" } else { "" };
        writeln!(self.writer, "- {}{}", entry_line(entry), exported)
            .with_context(|| format!("Failed to write time entry: {}", entry.id))?;

        Ok(())
    }

    fn show_adjustment(&mut self, outcome: &AdjustOutcome) -> Result<()> {
        let item = &outcome.work_item;
        let status = if outcome.changed { "updated" } else { "unchanged" };
        writeln!(self.writer, "# D#{} {} ({}, rev {})", item.id, item.title, status, item.rev)?;
        let values = [
            ("Completed Work", item.completed_work),
            ("Remaining Work", item.remaining_work),
            ("Original Estimate", item.original_estimate),
        ];
        for (name, value) in values {
            let value = value.map_or_else(|| "-".to_string(), |hours| format!("{}h", hours));
            writeln!(self.writer, "- {}: {}", name, value)?;
        }
        if let Some(err) = &outcome.export_error {
            writeln!(self.writer, "- export failed: {}", err)?;
        }

        Ok(())
    }

    fn show_reorder(&mut self, results: &[ReorderResult]) -> Result<()> {
        for result in results {
            writeln!(self.writer, "- D#{}: {}", result.id, result.order)
                .context("Failed to write reorder result")?;
        }

        Ok(())
    }
}

/// 集計値を`(1.50h, running)`のような文字列にする。
fn describe(rollup: &Rollup) -> String {
    let hours = rollup.total_time.num_seconds() as f64 / 3600.0;
    let mut parts = vec![format!("{:.2}h", hours)];
    if rollup.is_running {
        parts.push("running".to_string());
    }
    if rollup.all_exported {
        parts.push("exported".to_string());
    }
    format!("({})", parts.join(", "))
}

fn entry_line(entry: &TimeEntry) -> String {
    let start_str = entry
        .begin
        .with_timezone(&Local)
        .format("%H:%M")
        .to_string();
    let end_str = entry
        .end
        .map(|end| end.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "now".to_string());
    let overlap = if entry.is_overlapping { " [overlap]" } else { "" };
    let description = entry.description.lines().next().unwrap_or_default();

    format!("{} ~ {}{}: {}", start_str, end_str, overlap, description)
}
