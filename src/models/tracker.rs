//! Issue tracker records shared by every remote provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

/// Comment reactions understood by the trackers
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Reaction {
    #[serde(rename = "+1")]
    #[strum(serialize = "+1")]
    PlusOne,
    #[serde(rename = "-1")]
    #[strum(serialize = "-1")]
    MinusOne,
    Laugh,
    Confused,
    Heart,
    Hooray,
    Rocket,
    Eyes,
}

/// Reaction counters on a comment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Reactions {
    #[serde(rename = "+1")]
    pub plus_one: u32,
    #[serde(rename = "-1")]
    pub minus_one: u32,
    pub laugh: u32,
    pub confused: u32,
    pub heart: u32,
    pub hooray: u32,
    pub rocket: u32,
    pub eyes: u32,
}

impl Reactions {
    pub fn add(&mut self, reaction: Reaction) {
        let counter = match reaction {
            Reaction::PlusOne => &mut self.plus_one,
            Reaction::MinusOne => &mut self.minus_one,
            Reaction::Laugh => &mut self.laugh,
            Reaction::Confused => &mut self.confused,
            Reaction::Heart => &mut self.heart,
            Reaction::Hooray => &mut self.hooray,
            Reaction::Rocket => &mut self.rocket,
            Reaction::Eyes => &mut self.eyes,
        };
        *counter += 1;
    }

    pub fn total(&self) -> u32 {
        self.plus_one
            + self.minus_one
            + self.laugh
            + self.confused
            + self.heart
            + self.hooray
            + self.rocket
            + self.eyes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_hunk: Option<String>,
    #[serde(default)]
    pub reactions: Reactions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: IssueState,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: PullRequestState,
    #[serde(default)]
    pub head_branch: String,
    #[serde(default)]
    pub base_branch: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// Fields supplied when opening an issue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NewIssue {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Fields supplied when commenting; `diff_hunk` anchors a review comment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_hunk: Option<String>,
}

/// Issue listing filter; the default matches every issue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IssueFilter {
    pub state: Option<IssueState>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl IssueFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn open() -> Self {
        Self {
            state: Some(IssueState::Open),
            labels: Vec::new(),
        }
    }

    pub fn matches(&self, issue: &Issue) -> bool {
        if let Some(state) = self.state {
            if issue.state != state {
                return false;
            }
        }
        self.labels.iter().all(|label| issue.labels.contains(label))
    }
}

/// What a comment is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString)]
pub enum CommentTarget {
    #[serde(rename = "issue")]
    #[strum(serialize = "issue")]
    Issue,
    #[serde(rename = "pr")]
    #[strum(serialize = "pr")]
    PullRequest,
}
