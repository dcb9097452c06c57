//! GitHub REST provider
//!
//! Talks to the GitHub v3 REST API for one `owner/name` repository. List
//! endpoints follow `Link` pagination. Issue
//! deletion is only available through GraphQL, so `delete_issue` resolves the
//! issue's node id first. Pull requests cannot be deleted on GitHub; deleting
//! one closes it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, trace, warn};

use super::RemoteProvider;
use crate::errors::{ProviderError, ProviderResult};
use crate::models::{
    Comment, Issue, IssueFilter, IssueState, NewComment, NewIssue, ProviderKind, PullRequest,
    PullRequestState, Reaction, Reactions, RemoteRepository,
};

const ACCEPT_JSON: &str = "application/vnd.github+json";
const ACCEPT_DIFF: &str = "application/vnd.github.diff";
const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: &str = "100";
/// Upper bound on followed `Link` pages per listing
const MAX_PAGES: u32 = 50;

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    labels: Vec<GhLabel>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    node_id: String,
    /// Present when the "issue" is really a pull request
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GhBranch {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhPullRequest {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    merged_at: Option<DateTime<Utc>>,
    head: GhBranch,
    base: GhBranch,
    #[serde(default)]
    labels: Vec<GhLabel>,
}

#[derive(Debug, Deserialize)]
struct GhComment {
    id: i64,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhCreated {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct GhRepository {
    full_name: String,
    description: Option<String>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    default_branch: String,
    #[serde(default)]
    clone_url: String,
    #[serde(default)]
    ssh_url: String,
    #[serde(default)]
    html_url: String,
}

impl From<GhRepository> for RemoteRepository {
    fn from(repository: GhRepository) -> Self {
        RemoteRepository {
            full_name: repository.full_name,
            description: repository.description.unwrap_or_default(),
            private: repository.private,
            default_branch: repository.default_branch,
            clone_url: repository.clone_url,
            ssh_url: repository.ssh_url,
            html_url: repository.html_url,
        }
    }
}

impl From<GhIssue> for Issue {
    fn from(issue: GhIssue) -> Self {
        Issue {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            state: if issue.state == "closed" {
                IssueState::Closed
            } else {
                IssueState::Open
            },
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            created_at: issue.created_at,
            comments: Vec::new(),
        }
    }
}

impl From<GhPullRequest> for PullRequest {
    fn from(pr: GhPullRequest) -> Self {
        let state = match (pr.state.as_str(), pr.merged_at) {
            (_, Some(_)) => PullRequestState::Merged,
            ("closed", None) => PullRequestState::Closed,
            _ => PullRequestState::Open,
        };
        PullRequest {
            number: pr.number,
            title: pr.title,
            body: pr.body.unwrap_or_default(),
            state,
            head_branch: pr.head.name,
            base_branch: pr.base.name,
            labels: pr.labels.into_iter().map(|l| l.name).collect(),
            comments: Vec::new(),
        }
    }
}

/// Authenticated access to the GitHub REST API
///
/// Shared by every repository-bound [`GitHubProvider`] and used directly for
/// account-level calls such as [`GitHubClient::repositories`].
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(http: reqwest::Client, api_url: &str, token: Option<String>) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn request(&self, method: Method, url: &str, accept: &str) -> ProviderResult<RequestBuilder> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ProviderError::unauthorized("GitHub token not configured"))?;

        Ok(self
            .http
            .request(method, url)
            .bearer_auth(token)
            .header(header::ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION))
    }

    async fn send(
        &self,
        request: RequestBuilder,
        resource: &str,
        id: impl ToString,
    ) -> ProviderResult<Response> {
        let id = id.to_string();
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::unauthorized(
                format!("GitHub rejected the request ({status})"),
            )),
            StatusCode::NOT_FOUND => Err(ProviderError::not_found(resource, id)),
            _ => {
                let body = response.text().await.unwrap_or_default();
                warn!("GitHub returned {} for {} {}: {}", status, resource, id, body);
                Err(ProviderError::upstream(format!(
                    "GitHub returned {status}: {body}"
                )))
            }
        }
    }

    async fn json<T: DeserializeOwned>(response: Response) -> ProviderResult<T> {
        response
            .json()
            .await
            .map_err(|e| ProviderError::upstream(format!("unexpected GitHub response: {e}")))
    }

    /// Collect every page of a list endpoint by following `Link: rel="next"`
    async fn get_all<T: DeserializeOwned>(
        &self,
        first: RequestBuilder,
        resource: &str,
        id: &str,
    ) -> ProviderResult<Vec<T>> {
        let mut items = Vec::new();
        let mut request = first;
        for page in 1..=MAX_PAGES {
            let response = self.send(request, resource, id).await?;
            let next = next_page(response.headers());
            let batch: Vec<T> = Self::json(response).await?;
            items.extend(batch);

            let Some(url) = next else {
                return Ok(items);
            };
            trace!("Fetching page {} of {} {}", page + 1, resource, id);
            request = self.request(Method::GET, &url, ACCEPT_JSON)?;
        }
        warn!(
            "Stopped after {} pages of {} {}; the list is truncated",
            MAX_PAGES, resource, id
        );
        Ok(items)
    }

    /// Repositories the token's user can access
    pub async fn repositories(&self) -> ProviderResult<Vec<RemoteRepository>> {
        let url = format!("{}/user/repos", self.api_url);
        let request = self
            .request(Method::GET, &url, ACCEPT_JSON)?
            .query(&[("per_page", PAGE_SIZE), ("sort", "full_name")]);
        let repositories: Vec<GhRepository> = self.get_all(request, "user", "repositories").await?;
        debug!("Fetched {} repositories from GitHub", repositories.len());
        Ok(repositories.into_iter().map(RemoteRepository::from).collect())
    }
}

/// URL of the `rel="next"` entry of a `Link` header
fn next_page(headers: &header::HeaderMap) -> Option<String> {
    let link = headers.get(header::LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let url = parts.next()?.trim();
        parts
            .any(|param| param.trim() == r#"rel="next""#)
            .then(|| url.trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

pub struct GitHubProvider {
    client: GitHubClient,
    remote_path: String,
}

impl GitHubProvider {
    pub fn new(client: GitHubClient, remote_path: &str) -> Self {
        Self {
            client,
            remote_path: remote_path.trim_matches('/').to_string(),
        }
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!("{}/repos/{}{}", self.client.api_url, self.remote_path, suffix)
    }

    fn request(&self, method: Method, url: &str) -> ProviderResult<RequestBuilder> {
        self.request_accepting(method, url, ACCEPT_JSON)
    }

    fn request_accepting(
        &self,
        method: Method,
        url: &str,
        accept: &str,
    ) -> ProviderResult<RequestBuilder> {
        let request = self.client.request(method, url, accept)?;
        if !self.remote_path.contains('/') {
            return Err(ProviderError::not_found("repository", &self.remote_path));
        }
        Ok(request)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        resource: &str,
        id: impl ToString,
    ) -> ProviderResult<Response> {
        self.client.send(request, resource, id).await
    }

    async fn patch_issue(&self, number: u64, body: serde_json::Value) -> ProviderResult<()> {
        let url = self.repo_url(&format!("/issues/{number}"));
        self.send(self.request(Method::PATCH, &url)?.json(&body), "issue", number)
            .await?;
        Ok(())
    }

    async fn post_comment(&self, number: u64, body: String) -> ProviderResult<GhComment> {
        let url = self.repo_url(&format!("/issues/{number}/comments"));
        let response = self
            .send(
                self.request(Method::POST, &url)?.json(&json!({ "body": body })),
                "issue",
                number,
            )
            .await?;
        GitHubClient::json(response).await
    }
}

#[async_trait]
impl RemoteProvider for GitHubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn fetch_issues(&self, filter: &IssueFilter) -> ProviderResult<Vec<Issue>> {
        let state = filter
            .state
            .map_or_else(|| "all".to_string(), |s| s.to_string());
        let mut query = vec![("state", state), ("per_page", PAGE_SIZE.to_string())];
        if !filter.labels.is_empty() {
            query.push(("labels", filter.labels.join(",")));
        }

        let url = self.repo_url("/issues");
        let request = self.request(Method::GET, &url)?.query(&query);
        let issues: Vec<GhIssue> = self
            .client
            .get_all(request, "repository", &self.remote_path)
            .await?;

        let issues: Vec<Issue> = issues
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(Issue::from)
            .collect();
        debug!("Fetched {} issues from {}", issues.len(), self.remote_path);
        Ok(issues)
    }

    async fn fetch_pull_requests(&self, label: Option<&str>) -> ProviderResult<Vec<PullRequest>> {
        let url = self.repo_url("/pulls");
        let request = self
            .request(Method::GET, &url)?
            .query(&[("state", "open"), ("per_page", PAGE_SIZE)]);
        let pulls: Vec<GhPullRequest> = self
            .client
            .get_all(request, "repository", &self.remote_path)
            .await?;

        Ok(pulls
            .into_iter()
            .map(PullRequest::from)
            .filter(|pr| label.is_none_or(|l| pr.labels.iter().any(|x| x == l)))
            .collect())
    }

    async fn create_issue(&self, issue: NewIssue) -> ProviderResult<u64> {
        let url = self.repo_url("/issues");
        let response = self
            .send(
                self.request(Method::POST, &url)?.json(&json!({
                    "title": issue.title,
                    "body": issue.body,
                    "labels": issue.labels,
                })),
                "repository",
                &self.remote_path,
            )
            .await?;
        let created: GhCreated = GitHubClient::json(response).await?;
        debug!("Created issue #{} in {}", created.number, self.remote_path);
        Ok(created.number)
    }

    async fn create_issue_comment(
        &self,
        number: u64,
        comment: NewComment,
    ) -> ProviderResult<Comment> {
        let created = self.post_comment(number, comment.body).await?;
        Ok(Comment {
            id: created.id,
            body: created.body.unwrap_or_default(),
            diff_hunk: None,
            reactions: Reactions::default(),
        })
    }

    async fn create_pr_comment(&self, number: u64, comment: NewComment) -> ProviderResult<Comment> {
        // Line-anchored review comments need a commit and file position the
        // caller does not have, so the hunk is quoted in a conversation comment.
        let body = match &comment.diff_hunk {
            Some(hunk) => format!("```diff\n{}\n```\n\n{}", hunk, comment.body),
            None => comment.body.clone(),
        };
        let created = self.post_comment(number, body).await?;
        Ok(Comment {
            id: created.id,
            body: comment.body,
            diff_hunk: comment.diff_hunk,
            reactions: Reactions::default(),
        })
    }

    async fn add_comment_reaction(
        &self,
        comment_id: i64,
        reaction: Reaction,
    ) -> ProviderResult<()> {
        let url = self.repo_url(&format!("/issues/comments/{comment_id}/reactions"));
        self.send(
            self.request(Method::POST, &url)?
                .json(&json!({ "content": reaction.as_ref() })),
            "comment",
            comment_id,
        )
        .await?;
        Ok(())
    }

    async fn fetch_diffs(&self, number: u64) -> ProviderResult<String> {
        let url = self.repo_url(&format!("/pulls/{number}"));
        let response = self
            .send(
                self.request_accepting(Method::GET, &url, ACCEPT_DIFF)?,
                "pull request",
                number,
            )
            .await?;
        Ok(response.text().await?)
    }

    async fn add_label_to_issue(&self, number: u64, label: &str) -> ProviderResult<()> {
        let url = self.repo_url(&format!("/issues/{number}/labels"));
        self.send(
            self.request(Method::POST, &url)?
                .json(&json!({ "labels": [label] })),
            "issue",
            number,
        )
        .await?;
        Ok(())
    }

    async fn update_issue_state(&self, number: u64, state: IssueState) -> ProviderResult<()> {
        self.patch_issue(number, json!({ "state": state.as_ref() }))
            .await
    }

    async fn update_pull_request_state(
        &self,
        number: u64,
        state: PullRequestState,
    ) -> ProviderResult<()> {
        let request = match state {
            PullRequestState::Merged => {
                let url = self.repo_url(&format!("/pulls/{number}/merge"));
                self.request(Method::PUT, &url)?
            }
            PullRequestState::Open | PullRequestState::Closed => {
                let url = self.repo_url(&format!("/pulls/{number}"));
                self.request(Method::PATCH, &url)?
                    .json(&json!({ "state": state.as_ref() }))
            }
        };
        self.send(request, "pull request", number).await?;
        Ok(())
    }

    async fn delete_issue(&self, number: u64) -> ProviderResult<()> {
        let url = self.repo_url(&format!("/issues/{number}"));
        let response = self
            .send(self.request(Method::GET, &url)?, "issue", number)
            .await?;
        let issue: GhIssue = GitHubClient::json(response).await?;

        let graphql = format!("{}/graphql", self.client.api_url);
        let response = self
            .send(
                self.request(Method::POST, &graphql)?.json(&json!({
                    "query": "mutation($id: ID!) { deleteIssue(input: {issueId: $id}) { clientMutationId } }",
                    "variables": { "id": issue.node_id },
                })),
                "issue",
                number,
            )
            .await?;

        let result: serde_json::Value = GitHubClient::json(response).await?;
        if let Some(errors) = result.get("errors") {
            return Err(ProviderError::upstream(format!(
                "GitHub refused to delete issue #{number}: {errors}"
            )));
        }
        debug!("Deleted issue #{} from {}", number, self.remote_path);
        Ok(())
    }

    async fn delete_pull_request(&self, number: u64) -> ProviderResult<()> {
        self.update_pull_request_state(number, PullRequestState::Closed)
            .await
    }

    async fn update_issue(&self, number: u64, title: &str, body: &str) -> ProviderResult<()> {
        self.patch_issue(number, json!({ "title": title, "body": body }))
            .await
    }
}
