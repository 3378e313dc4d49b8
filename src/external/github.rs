//! GitHub REST client implementing the `RepoHost` seam.
//!
//! Multi-file commits go through the git data API (blobs, tree, commit, ref
//! update) so a generated asset batch lands as one commit. Merge and lookup
//! calls use `execute` directly because their non-2xx statuses carry meaning
//! (409 conflict, 404 missing) and must not be turned into errors upstream.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::external::{MergeOutcome, RepoFile, RepoHost};
use crate::retry::Transport;

const API_BASE: &str = "https://api.github.com";

pub struct GitHubClient {
    transport: Transport,
    owner: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    tree: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    html_url: String,
}

impl GitHubClient {
    pub fn new(transport: Transport, owner: &str, token: &str) -> Self {
        Self {
            transport,
            owner: owner.to_string(),
            token: token.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.transport
            .client()
            .request(method, format!("{API_BASE}{path}"))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "conveyor")
    }

    async fn ref_sha(&self, repo: &str, branch: &str) -> Result<String> {
        let request = self.request(
            reqwest::Method::GET,
            &format!("/repos/{}/{repo}/git/ref/heads/{branch}", self.owner),
        );
        let response = self.transport.execute_ok("github:ref", request).await?;
        let parsed: RefResponse = response.json().await.context("decoding ref response")?;
        Ok(parsed.object.sha)
    }
}

#[async_trait]
impl RepoHost for GitHubClient {
    async fn ensure_repo(&self, name: &str, private: bool) -> Result<String> {
        let get = self.request(reqwest::Method::GET, &format!("/repos/{}/{name}", self.owner));
        let response = self.transport.execute("github:repo", get).await?;
        if response.status().is_success() {
            let repo: RepoResponse = response.json().await.context("decoding repo response")?;
            return Ok(repo.clone_url);
        }
        if response.status().as_u16() != 404 {
            bail!(
                "unexpected status {} looking up repo {name}",
                response.status()
            );
        }

        debug!(repo = name, "creating repository");
        let create = self.request(reqwest::Method::POST, "/user/repos").json(&json!({
            "name": name,
            "private": private,
            "auto_init": true,
        }));
        let response = self.transport.execute_ok("github:create-repo", create).await?;
        let repo: RepoResponse = response.json().await.context("decoding repo response")?;
        Ok(repo.clone_url)
    }

    async fn branch_exists(&self, repo: &str, branch: &str) -> Result<bool> {
        let request = self.request(
            reqwest::Method::GET,
            &format!("/repos/{}/{repo}/git/ref/heads/{branch}", self.owner),
        );
        let response = self.transport.execute("github:ref", request).await?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => bail!("unexpected status {status} checking branch {branch}"),
        }
    }

    async fn create_branch(&self, repo: &str, branch: &str, from: &str) -> Result<()> {
        let sha = self.ref_sha(repo, from).await?;
        let request = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{}/{repo}/git/refs", self.owner),
            )
            .json(&json!({ "ref": format!("refs/heads/{branch}"), "sha": sha }));
        self.transport
            .execute_ok("github:create-branch", request)
            .await?;
        Ok(())
    }

    async fn merge(&self, repo: &str, base: &str, head: &str) -> Result<MergeOutcome> {
        let request = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{}/{repo}/merges", self.owner),
            )
            .json(&json!({
                "base": base,
                "head": head,
                "commit_message": format!("merge {head} into {base}"),
            }));
        let response = self.transport.execute("github:merge", request).await?;
        match response.status().as_u16() {
            201 => Ok(MergeOutcome::Merged),
            204 => Ok(MergeOutcome::UpToDate),
            409 => Ok(MergeOutcome::Conflict),
            status => {
                let body = response.text().await.unwrap_or_default();
                bail!("merge of {head} into {base} failed with status {status}: {body}")
            }
        }
    }

    async fn commit_files(
        &self,
        repo: &str,
        branch: &str,
        message: &str,
        files: &[RepoFile],
    ) -> Result<()> {
        let owner = &self.owner;
        let head_sha = self.ref_sha(repo, branch).await?;

        let request = self.request(
            reqwest::Method::GET,
            &format!("/repos/{owner}/{repo}/git/commits/{head_sha}"),
        );
        let response = self.transport.execute_ok("github:commit", request).await?;
        let head_commit: CommitResponse =
            response.json().await.context("decoding commit response")?;

        let mut tree_entries = Vec::with_capacity(files.len());
        for file in files {
            let request = self
                .request(
                    reqwest::Method::POST,
                    &format!("/repos/{owner}/{repo}/git/blobs"),
                )
                .json(&json!({ "content": file.content_base64, "encoding": "base64" }));
            let response = self.transport.execute_ok("github:blob", request).await?;
            let blob: ShaResponse = response.json().await.context("decoding blob response")?;
            tree_entries.push(json!({
                "path": file.path,
                "mode": "100644",
                "type": "blob",
                "sha": blob.sha,
            }));
        }

        let request = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{owner}/{repo}/git/trees"),
            )
            .json(&json!({ "base_tree": head_commit.tree.sha, "tree": tree_entries }));
        let response = self.transport.execute_ok("github:tree", request).await?;
        let tree: ShaResponse = response.json().await.context("decoding tree response")?;

        let request = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{owner}/{repo}/git/commits"),
            )
            .json(&json!({
                "message": message,
                "tree": tree.sha,
                "parents": [head_sha],
            }));
        let response = self.transport.execute_ok("github:commit", request).await?;
        let commit: ShaResponse = response.json().await.context("decoding commit response")?;

        let request = self
            .request(
                reqwest::Method::PATCH,
                &format!("/repos/{owner}/{repo}/git/refs/heads/{branch}"),
            )
            .json(&json!({ "sha": commit.sha, "force": false }));
        self.transport.execute_ok("github:update-ref", request).await?;

        debug!(repo, branch, files = files.len(), "committed file batch");
        Ok(())
    }

    async fn read_file(&self, repo: &str, reference: &str, path: &str) -> Result<Option<String>> {
        let request = self.request(
            reqwest::Method::GET,
            &format!("/repos/{}/{repo}/contents/{path}?ref={reference}", self.owner),
        );
        let response = self.transport.execute("github:contents", request).await?;
        match response.status().as_u16() {
            200 => {
                let content: ContentResponse =
                    response.json().await.context("decoding contents response")?;
                // The contents API wraps base64 at 60 columns.
                let compact: String = content
                    .content
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                let bytes = BASE64
                    .decode(compact)
                    .context("decoding base64 file content")?;
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
            404 => Ok(None),
            status => bail!("unexpected status {status} reading {path}@{reference}"),
        }
    }

    async fn open_change_request(
        &self,
        repo: &str,
        base: &str,
        head: &str,
        title: &str,
        body: &str,
    ) -> Result<String> {
        let request = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{}/{repo}/pulls", self.owner),
            )
            .json(&json!({ "base": base, "head": head, "title": title, "body": body }));
        let response = self.transport.execute("github:pulls", request).await?;
        if response.status().is_success() {
            let pull: PullResponse = response.json().await.context("decoding pull response")?;
            return Ok(pull.html_url);
        }
        if response.status().as_u16() == 422 {
            // A pull request for this head already exists; reuse it.
            let request = self.request(
                reqwest::Method::GET,
                &format!(
                    "/repos/{}/{repo}/pulls?head={}:{head}&base={base}&state=open",
                    self.owner, self.owner
                ),
            );
            let response = self.transport.execute_ok("github:pulls", request).await?;
            let pulls: Vec<PullResponse> =
                response.json().await.context("decoding pull list response")?;
            if let Some(existing) = pulls.into_iter().next() {
                return Ok(existing.html_url);
            }
        }
        bail!("could not open a change request from {head} into {base}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_response_decodes_wrapped_base64() {
        // "hello world\n" encoded, wrapped the way the contents API wraps it.
        let wrapped = "aGVsbG8g\nd29ybGQK\n";
        let compact: String = wrapped.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = BASE64.decode(compact).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "hello world\n");
    }

    #[test]
    fn ref_response_shape() {
        let parsed: RefResponse = serde_json::from_value(serde_json::json!({
            "ref": "refs/heads/main",
            "object": { "sha": "abc123", "type": "commit" }
        }))
        .unwrap();
        assert_eq!(parsed.object.sha, "abc123");
    }
}
