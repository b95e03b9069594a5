use chrono::Duration;
use log::{info, warn};

use crate::devops::IssueTracker;
use crate::error::{Error, Result};
use crate::export::AdjustmentSink;
use crate::work_item::{fields, FieldOp, PatchRequest, TaskAdjustment, WorkItem};

const COMPLETED_STEP: f64 = 0.05;
const REMAINING_STEP: f64 = 0.1;

/// `value`を`step`の倍数に丸める。浮動小数点の端数は落とす。
pub fn round_to_nearest(value: f64, step: f64) -> f64 {
    let rounded = (value / step).round() * step;
    (rounded * 1000.0).round() / 1000.0
}

/// 作業時間の調整結果。
#[derive(Clone, Debug, PartialEq)]
pub struct AdjustOutcome {
    /// 更新後(更新しなかった場合は取得した時点)のwork item。
    pub work_item: WorkItem,
    pub changed: bool,
    /// 調整結果の送り出しに失敗した場合のメッセージ。更新自体は取り消さない。
    pub export_error: Option<String>,
}

/// taskに`delta_hours`を加えたときに書き換えるフィールドを求める。値が変わらないフィールドは含めない。
fn plan(task: &WorkItem, delta_hours: f64) -> Vec<FieldOp> {
    let mut ops = Vec::new();

    let current_completed = task.completed_work.unwrap_or(0.0);
    let completed = round_to_nearest(current_completed + delta_hours, COMPLETED_STEP);
    if completed != current_completed {
        ops.push(FieldOp::set(fields::COMPLETED_WORK, completed));
    }

    let remaining = if task.is_done() {
        task.remaining_work
    } else if let Some(current) = task.remaining_work {
        Some(round_to_nearest((current - delta_hours).max(0.0), REMAINING_STEP))
    } else {
        task.original_estimate
            .map(|baseline| round_to_nearest((baseline - delta_hours).max(0.0), REMAINING_STEP))
    };
    if let Some(remaining) = remaining.filter(|value| Some(*value) != task.remaining_work) {
        ops.push(FieldOp::set(fields::REMAINING_WORK, remaining));
    }

    // 当初見積もりは一度だけ、調整前の残り作業時間で埋める。
    if task.original_estimate.is_none() {
        if let Some(baseline) = task.remaining_work {
            ops.push(FieldOp::set(fields::ORIGINAL_ESTIMATE, baseline));
        }
    }

    ops
}

/// taskの実績作業時間を調整する。
pub struct Adjuster<'a, I> {
    issues: &'a I,
    sink: &'a dyn AdjustmentSink,
}

impl<'a, I: IssueTracker> Adjuster<'a, I> {
    pub fn new(issues: &'a I, sink: &'a dyn AdjustmentSink) -> Self {
        Self { issues, sink }
    }

    /// work itemの実績作業時間に`delta`を加え、残り作業時間と当初見積もりを合わせて更新する。
    ///
    /// 更新は取得時のrevisionを前提とした条件付きで行い、その間に他から更新されていれば
    /// `ConcurrencyConflict`を返す。書き換える値がなければ更新しない。
    ///
    /// # Arguments
    ///
    /// * `work_item_id` - 調整するtaskの番号
    /// * `delta` - 実績作業時間に加える時間(負の値で減らす)
    pub async fn adjust(&self, work_item_id: u32, delta: Duration) -> Result<AdjustOutcome> {
        let task = self
            .issues
            .get_work_items(&[work_item_id])
            .await?
            .into_iter()
            .find(|item| item.id == work_item_id)
            .ok_or_else(|| Error::NotFound(format!("work item {}", work_item_id)))?;
        if !task.is_task() {
            return Err(Error::InvalidOperation(format!(
                "work item {} is not a task ({})",
                work_item_id, task.work_item_type
            )));
        }

        let delta_hours = delta.num_seconds() as f64 / 3600.0;
        let ops = plan(&task, delta_hours);
        if ops.is_empty() {
            info!("Work item {} needs no update", work_item_id);
            return Ok(AdjustOutcome {
                work_item: task,
                changed: false,
                export_error: None,
            });
        }

        let updated = self
            .issues
            .patch_work_item(&PatchRequest {
                id: work_item_id,
                expected_revision: task.rev,
                ops,
            })
            .await?;
        info!(
            "Adjusted work item {} by {:+.2}h (rev {} -> {})",
            work_item_id, delta_hours, task.rev, updated.rev
        );

        let adjustment = TaskAdjustment {
            work_item_id,
            delta_hours,
        };
        let export_error = match self.sink.send(&adjustment).await {
            Ok(()) => None,
            Err(err) => {
                warn!("Failed to export adjustment of work item {}: {}", work_item_id, err);
                Some(err.to_string())
            }
        };

        Ok(AdjustOutcome {
            work_item: updated,
            changed: true,
            export_error,
        })
    }
}
