use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// 達成事項を示す行頭のアイコン。
pub const ACCOMPLISHMENT_ICON: &str = "✅";
/// 障害を示す行頭のアイコン。
pub const IMPEDIMENT_ICON: &str = "🚧";
/// 学びを示す行頭のアイコン。
pub const LEARNING_ICON: &str = "💡";

/// 親と子のwork item参照を空白区切りで並べた行。
static DUAL_WORK_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i:d)#?(\d+)\b[ -]*(.*?)\s+(?i:d)#?(\d+)\b[ -]*(.*)$")
        .expect("dual work item pattern is valid")
});

static SINGLE_WORK_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i:d)#?(\d+)\b[ -]*(.*)$").expect("single work item pattern is valid")
});

/// コメントの種類。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommentType {
    WorkItem,
    Accomplishment,
    Impediment,
    Learning,
    Other,
}

/// work itemの番号とタイトル。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItemRef {
    pub id: u32,
    pub title: String,
}

/// time entryの説明文の1行を分類したもの。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Comment {
    /// 参照は1つ、または(親, 子)の順の2つ。
    WorkItem { refs: Vec<WorkItemRef>, text: String },
    Accomplishment(String),
    Impediment(String),
    Learning(String),
    Other(String),
}

impl Comment {
    pub fn comment_type(&self) -> CommentType {
        match self {
            Comment::WorkItem { .. } => CommentType::WorkItem,
            Comment::Accomplishment(_) => CommentType::Accomplishment,
            Comment::Impediment(_) => CommentType::Impediment,
            Comment::Learning(_) => CommentType::Learning,
            Comment::Other(_) => CommentType::Other,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Comment::WorkItem { text, .. } => text,
            Comment::Accomplishment(text)
            | Comment::Impediment(text)
            | Comment::Learning(text)
            | Comment::Other(text) => text,
        }
    }

    /// 参照しているwork itemのうち最も具体的なもの(2つあれば子)の番号を返す。
    pub fn linked_work_item(&self) -> Option<u32> {
        match self {
            Comment::WorkItem { refs, .. } => refs.last().map(|work_item| work_item.id),
            _ => None,
        }
    }
}

type Rule = fn(&str) -> Option<Comment>;

/// 優先順に並べた分類規則。最初に一致した規則を採用する。
const RULES: &[Rule] = &[
    dual_work_item,
    single_work_item,
    accomplishment,
    impediment,
    learning,
];

fn work_item_ref(captures: &Captures, id: usize, title: usize) -> Option<WorkItemRef> {
    Some(WorkItemRef {
        id: captures.get(id)?.as_str().parse().ok()?,
        title: captures.get(title)?.as_str().trim().to_string(),
    })
}

fn dual_work_item(line: &str) -> Option<Comment> {
    let captures = DUAL_WORK_ITEM.captures(line)?;
    let parent = work_item_ref(&captures, 1, 2)?;
    let child = work_item_ref(&captures, 3, 4)?;

    Some(Comment::WorkItem {
        refs: vec![parent, child],
        text: line.to_string(),
    })
}

fn single_work_item(line: &str) -> Option<Comment> {
    let captures = SINGLE_WORK_ITEM.captures(line)?;

    Some(Comment::WorkItem {
        refs: vec![work_item_ref(&captures, 1, 2)?],
        text: line.to_string(),
    })
}

fn strip_icon(line: &str, icon: &str) -> Option<String> {
    line.strip_prefix(icon).map(|rest| rest.trim().to_string())
}

fn accomplishment(line: &str) -> Option<Comment> {
    strip_icon(line, ACCOMPLISHMENT_ICON).map(Comment::Accomplishment)
}

fn impediment(line: &str) -> Option<Comment> {
    strip_icon(line, IMPEDIMENT_ICON).map(Comment::Impediment)
}

fn learning(line: &str) -> Option<Comment> {
    strip_icon(line, LEARNING_ICON).map(Comment::Learning)
}

/// 1行を分類する。どの規則にも一致しなければ`Other`になる。
pub fn classify_line(line: &str) -> Comment {
    RULES
        .iter()
        .find_map(|rule| rule(line))
        .unwrap_or_else(|| Comment::Other(line.to_string()))
}

/// 複数行の説明文を行ごとに分類する。
///
/// 空行は捨て、同じ行は最初の1つだけを残す。各行は前後の行と無関係に分類される。
pub fn classify(description: &str) -> Vec<Comment> {
    let mut seen = HashSet::new();

    description
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .map(classify_line)
        .collect()
}

/// 指定した種類のコメントの本文を改行で連結する。該当がなければ`None`を返す。
pub fn join<'a, I, P>(comments: I, predicate: P) -> Option<String>
where
    I: IntoIterator<Item = &'a Comment>,
    P: Fn(CommentType) -> bool,
{
    let texts: Vec<&str> = comments
        .into_iter()
        .filter(|comment| predicate(comment.comment_type()))
        .map(Comment::text)
        .collect();

    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}
