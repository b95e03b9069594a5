use std::collections::HashMap;

use log::{info, warn};

use crate::devops::IssueTracker;
use crate::error::{Error, Result};
use crate::work_item::{fields, FieldOp, Iteration, PatchRequest};

/// 後ろのアンカーがない場合に、既存の最大位置の後ろに空ける幅。
pub const END_PADDING: f64 = 100.0;

/// 移動するwork itemと、その間に入れる前後のアンカー。
#[derive(Clone, Debug, PartialEq)]
pub struct ReorderOperation {
    /// この順に並べる。
    pub ids: Vec<u32>,
    pub previous_id: Option<u32>,
    pub next_id: Option<u32>,
}

/// 移動したwork itemの新しい位置(backlog priority)。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReorderResult {
    pub id: u32,
    pub order: f64,
}

fn position_of(positions: &HashMap<u32, f64>, id: u32) -> Result<f64> {
    positions
        .get(&id)
        .copied()
        .ok_or_else(|| Error::NotFound(format!("backlog position of work item {}", id)))
}

/// 既存の最大位置。iterationが空なら`0.0`とする。
fn max_position(positions: &HashMap<u32, f64>) -> f64 {
    positions
        .values()
        .copied()
        .reduce(f64::max)
        .unwrap_or(0.0)
}

/// 前後のアンカーの間を等分して、移動するwork itemの位置を求める。
///
/// 前のアンカーがなければ`0.0`から、後ろのアンカーがなければ既存の最大位置に
/// `END_PADDING`を足した位置までを使う。全てのidが同じiterationに属することは呼び出し側が保証する。
///
/// # Arguments
///
/// * `positions` - iteration内のwork itemの現在の位置
/// * `operation` - 移動内容
pub fn plan(positions: &HashMap<u32, f64>, operation: &ReorderOperation) -> Result<Vec<ReorderResult>> {
    let previous = match operation.previous_id {
        Some(id) => position_of(positions, id)?,
        None => 0.0,
    };
    let next = match operation.next_id {
        Some(id) => position_of(positions, id)?,
        None => max_position(positions) + END_PADDING,
    };
    if previous >= next {
        return Err(Error::InvalidOperation(format!(
            "previous position {} is not before next position {}",
            previous, next
        )));
    }

    let gap = (next - previous) / (operation.ids.len() as f64 + 1.0);
    Ok(operation
        .ids
        .iter()
        .enumerate()
        .map(|(index, id)| ReorderResult {
            id: *id,
            order: previous + gap * (index + 1) as f64,
        })
        .collect())
}

/// iterationのbacklogの並べ替え。
pub struct Backlog<'a, I> {
    issues: &'a I,
}

impl<'a, I: IssueTracker> Backlog<'a, I> {
    pub fn new(issues: &'a I) -> Self {
        Self { issues }
    }

    /// `moved`を`previous_id`と`next_id`の間へ、この順に移動する。
    ///
    /// 新しい位置は各work itemの読み込み時のrevisionを前提に書き込む。
    pub async fn reorder(
        &self,
        iteration: &Iteration,
        moved: &[u32],
        previous_id: Option<u32>,
        next_id: Option<u32>,
    ) -> Result<Vec<ReorderResult>> {
        let members = self.issues.get_iteration_work_items(iteration).await?;
        let mut ids: Vec<u32> = members.iter().map(|member| member.id).collect();
        ids.extend_from_slice(moved);
        ids.sort_unstable();
        ids.dedup();
        let items = self.issues.get_work_items(&ids).await?;

        let member_ids: Vec<u32> = members.iter().map(|member| member.id).collect();
        let positions: HashMap<u32, f64> = items
            .iter()
            .filter(|item| member_ids.contains(&item.id))
            .filter_map(|item| item.backlog_priority.map(|order| (item.id, order)))
            .collect();
        let revisions: HashMap<u32, u32> = items.iter().map(|item| (item.id, item.rev)).collect();

        let operation = ReorderOperation {
            ids: moved.to_vec(),
            previous_id,
            next_id,
        };
        let results = plan(&positions, &operation)?;

        // 書き込みを始める前に全てのrevisionを揃え、見つからなければ何も書かない。
        let requests = results
            .iter()
            .map(|result| -> Result<PatchRequest> {
                let expected_revision = *revisions
                    .get(&result.id)
                    .ok_or_else(|| Error::NotFound(format!("work item {}", result.id)))?;
                Ok(PatchRequest {
                    id: result.id,
                    expected_revision,
                    ops: vec![FieldOp::set(fields::BACKLOG_PRIORITY, result.order)],
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut written = Vec::with_capacity(requests.len());
        for request in &requests {
            if let Err(err) = self.issues.patch_work_item(request).await {
                if !written.is_empty() {
                    warn!(
                        "Reorder of iteration {} stopped at work item {}; already written: {:?}",
                        iteration.id, request.id, written
                    );
                }
                return Err(err);
            }
            written.push(request.id);
        }
        info!(
            "Reordered {} work items in iteration {}",
            results.len(),
            iteration.id
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::{plan, Backlog, ReorderOperation, ReorderResult};
    use crate::devops::MockIssueTracker;
    use crate::error::Error;
    use crate::work_item::test_support::task;
    use crate::work_item::{Iteration, IterationItem, WorkItem};

    fn positions() -> HashMap<u32, f64> {
        HashMap::from([(1, 100.0), (2, 200.0), (3, 500.0)])
    }

    fn operation(ids: &[u32], previous_id: Option<u32>, next_id: Option<u32>) -> ReorderOperation {
        ReorderOperation {
            ids: ids.to_vec(),
            previous_id,
            next_id,
        }
    }

    #[test]
    fn test_no_anchors_goes_before_padding_end() {
        let results = plan(&positions(), &operation(&[9], None, None)).unwrap();

        assert_eq!(results, vec![ReorderResult { id: 9, order: 300.0 }]);
        assert!(results[0].order > 0.0 && results[0].order < 600.0);
    }

    #[test]
    fn test_between_anchors_evenly_spaced() {
        let results = plan(&positions(), &operation(&[7, 8, 9], Some(1), Some(2))).unwrap();

        assert_eq!(
            results,
            vec![
                ReorderResult { id: 7, order: 125.0 },
                ReorderResult { id: 8, order: 150.0 },
                ReorderResult { id: 9, order: 175.0 },
            ]
        );
    }

    #[test]
    fn test_only_previous_anchor() {
        let results = plan(&positions(), &operation(&[9], Some(3), None)).unwrap();

        assert_eq!(results, vec![ReorderResult { id: 9, order: 550.0 }]);
    }

    #[test]
    fn test_padding_follows_negative_positions() {
        let positions = HashMap::from([(1, -500.0), (2, -300.0)]);

        let results = plan(&positions, &operation(&[9], Some(2), None)).unwrap();

        assert_eq!(results, vec![ReorderResult { id: 9, order: -250.0 }]);
    }

    #[test]
    fn test_empty_iteration() {
        let results = plan(&HashMap::new(), &operation(&[1], None, None)).unwrap();

        assert_eq!(results, vec![ReorderResult { id: 1, order: 50.0 }]);
    }

    #[rstest]
    #[case::reversed(Some(2), Some(1))]
    #[case::same_anchor(Some(2), Some(2))]
    fn test_anchors_out_of_order_fail(#[case] previous: Option<u32>, #[case] next: Option<u32>) {
        let result = plan(&positions(), &operation(&[9], previous, next));

        assert!(matches!(result, Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_unknown_anchor_is_not_found() {
        let result = plan(&positions(), &operation(&[9], Some(42), None));

        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    fn ranked(id: u32, order: f64) -> WorkItem {
        WorkItem {
            backlog_priority: Some(order),
            rev: id + 10,
            ..task(id)
        }
    }

    fn iteration() -> Iteration {
        Iteration {
            team: "team".to_string(),
            id: "sprint-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_backlog_writes_positions_with_revisions() {
        let mut issues = MockIssueTracker::new();
        issues.expect_get_iteration_work_items().returning(|_| {
            Ok(vec![
                IterationItem { id: 1, parent_id: None },
                IterationItem { id: 2, parent_id: None },
                IterationItem { id: 3, parent_id: Some(1) },
            ])
        });
        issues
            .expect_get_work_items()
            .returning(|_| Ok(vec![ranked(1, 100.0), ranked(2, 200.0), ranked(3, 300.0)]));
        issues
            .expect_patch_work_item()
            .withf(|request| request.id == 3 && request.expected_revision == 13)
            .times(1)
            .returning(|_| Ok(ranked(3, 150.0)));

        let results = Backlog::new(&issues)
            .reorder(&iteration(), &[3], Some(1), Some(2))
            .await
            .unwrap();

        assert_eq!(results, vec![ReorderResult { id: 3, order: 150.0 }]);
    }

    #[tokio::test]
    async fn test_backlog_rejects_before_writing() {
        let mut issues = MockIssueTracker::new();
        issues
            .expect_get_iteration_work_items()
            .returning(|_| Ok(vec![IterationItem { id: 1, parent_id: None }, IterationItem { id: 2, parent_id: None }]));
        issues
            .expect_get_work_items()
            .returning(|_| Ok(vec![ranked(1, 100.0), ranked(2, 200.0)]));
        issues.expect_patch_work_item().times(0);

        let result = Backlog::new(&issues)
            .reorder(&iteration(), &[1], Some(2), Some(1))
            .await;

        assert!(matches!(result, Err(Error::InvalidOperation(_))));
    }

    /// 移動するwork itemが同じiterationに属するかは確認しない。呼び出し側の責任とする。
    #[tokio::test]
    async fn test_backlog_does_not_check_iteration_membership() {
        let mut issues = MockIssueTracker::new();
        issues
            .expect_get_iteration_work_items()
            .returning(|_| Ok(vec![IterationItem { id: 1, parent_id: None }]));
        issues
            .expect_get_work_items()
            .withf(|ids| ids.to_vec() == vec![1u32, 50])
            .returning(|_| Ok(vec![ranked(1, 100.0), ranked(50, 9000.0)]));
        issues
            .expect_patch_work_item()
            .times(1)
            .returning(|_| Ok(ranked(50, 150.0)));

        let results = Backlog::new(&issues)
            .reorder(&iteration(), &[50], Some(1), None)
            .await
            .unwrap();

        // 50の現在の位置は最大位置の計算に含めない。
        assert_eq!(results, vec![ReorderResult { id: 50, order: 150.0 }]);
    }

    #[tokio::test]
    async fn test_backlog_missing_moved_item_writes_nothing() {
        let mut issues = MockIssueTracker::new();
        issues.expect_get_iteration_work_items().returning(|_| {
            Ok(vec![
                IterationItem { id: 1, parent_id: None },
                IterationItem { id: 2, parent_id: None },
            ])
        });
        issues
            .expect_get_work_items()
            .returning(|_| Ok(vec![ranked(1, 100.0), ranked(2, 200.0), ranked(7, 900.0)]));
        issues.expect_patch_work_item().times(0);

        let result = Backlog::new(&issues)
            .reorder(&iteration(), &[7, 8], Some(1), Some(2))
            .await;

        assert_eq!(result, Err(Error::NotFound("work item 8".to_string())));
    }

    #[tokio::test]
    async fn test_backlog_stops_at_first_conflict() {
        let mut issues = MockIssueTracker::new();
        issues.expect_get_iteration_work_items().returning(|_| {
            Ok(vec![
                IterationItem { id: 1, parent_id: None },
                IterationItem { id: 2, parent_id: None },
            ])
        });
        issues.expect_get_work_items().returning(|_| {
            Ok(vec![
                ranked(1, 100.0),
                ranked(2, 200.0),
                ranked(7, 900.0),
                ranked(8, 950.0),
                ranked(9, 990.0),
            ])
        });
        issues
            .expect_patch_work_item()
            .withf(|request| request.id == 7)
            .times(1)
            .returning(|_| Ok(ranked(7, 125.0)));
        issues
            .expect_patch_work_item()
            .withf(|request| request.id == 8)
            .times(1)
            .returning(|request| {
                Err(Error::ConcurrencyConflict {
                    id: request.id,
                    expected_revision: request.expected_revision,
                })
            });
        issues
            .expect_patch_work_item()
            .withf(|request| request.id == 9)
            .times(0);

        let result = Backlog::new(&issues)
            .reorder(&iteration(), &[7, 8, 9], Some(1), Some(2))
            .await;

        assert_eq!(
            result,
            Err(Error::ConcurrencyConflict {
                id: 8,
                expected_revision: 18
            })
        );
    }
}
