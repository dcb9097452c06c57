//! Domain records: tracked repositories and issue tracker data

pub mod repository;
pub mod tracker;

pub use repository::{
    ProviderKind, PublishedRepository, RemoteRepository, Repository, RepositoryView, SyncStatus,
};
pub use tracker::{
    Comment, CommentTarget, Issue, IssueFilter, IssueState, NewComment, NewIssue, PullRequest,
    PullRequestState, Reaction, Reactions,
};
