use serde::{Deserialize, Serialize};
use serde_json::Value;

/// work itemのフィールドの参照名。
pub mod fields {
    pub const TITLE: &str = "System.Title";
    pub const WORK_ITEM_TYPE: &str = "System.WorkItemType";
    pub const STATE: &str = "System.State";
    pub const PARENT: &str = "System.Parent";
    pub const COMPLETED_WORK: &str = "Microsoft.VSTS.Scheduling.CompletedWork";
    pub const REMAINING_WORK: &str = "Microsoft.VSTS.Scheduling.RemainingWork";
    pub const ORIGINAL_ESTIMATE: &str = "Microsoft.VSTS.Scheduling.OriginalEstimate";
    pub const BACKLOG_PRIORITY: &str = "Microsoft.VSTS.Common.BacklogPriority";
}

pub const TASK_TYPE: &str = "Task";
pub const DONE_STATE: &str = "Done";

/// issue trackerのwork item。作業量は時間単位。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: u32,
    pub rev: u32,
    pub title: String,
    pub work_item_type: String,
    pub state: String,
    pub parent_id: Option<u32>,
    pub completed_work: Option<f64>,
    pub remaining_work: Option<f64>,
    pub original_estimate: Option<f64>,
    pub backlog_priority: Option<f64>,
}

impl WorkItem {
    pub fn is_task(&self) -> bool {
        self.work_item_type == TASK_TYPE
    }

    pub fn is_done(&self) -> bool {
        self.state == DONE_STATE
    }
}

/// JSON Patchの1操作。
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum FieldOp {
    Add { path: String, value: Value },
    Test { path: String, value: Value },
}

impl FieldOp {
    /// フィールドに値を設定する。存在しないフィールドにも使える`add`を用いる。
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        FieldOp::Add {
            path: format!("/fields/{}", field),
            value: value.into(),
        }
    }

    /// revisionが`rev`のままであることを確認する操作。
    pub fn revision_test(rev: u32) -> Self {
        FieldOp::Test {
            path: "/rev".to_string(),
            value: rev.into(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FieldOp::Add { path, .. } | FieldOp::Test { path, .. } => path,
        }
    }
}

/// 期待するrevisionとフィールド操作をまとめた更新要求。
///
/// 上流でrevisionが一致しなければ更新は拒否される。
#[derive(Clone, Debug, PartialEq)]
pub struct PatchRequest {
    pub id: u32,
    pub expected_revision: u32,
    pub ops: Vec<FieldOp>,
}

/// チームのiteration(スプリント)。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Iteration {
    pub team: String,
    pub id: String,
}

/// iterationに含まれるwork itemと、その親。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IterationItem {
    pub id: u32,
    pub parent_id: Option<u32>,
}

/// taskの実績作業時間に加えた調整。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskAdjustment {
    pub work_item_id: u32,
    /// 符号付きの調整量(時間)。
    pub delta_hours: f64,
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{fields, FieldOp};

    #[test]
    fn test_field_op_serializes_as_json_patch() {
        let ops = vec![
            FieldOp::revision_test(4),
            FieldOp::set(fields::COMPLETED_WORK, 1.5),
        ];

        assert_eq!(
            serde_json::to_value(&ops).unwrap(),
            json!([
                {"op": "test", "path": "/rev", "value": 4},
                {"op": "add", "path": "/fields/Microsoft.VSTS.Scheduling.CompletedWork", "value": 1.5},
            ])
        );
    }
}
