//! Provider-specific webhook payload extraction.
//!
//! Each extractor returns a `FailureContext` only when the payload
//! describes a failed run; successful runs and unrelated events yield
//! `None`. Pure functions over the JSON body so they test without HTTP.

use mender_core::types::FailureContext;
use serde_json::Value;
use uuid::Uuid;

pub fn new_job_id() -> String {
    Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

fn str_at<'a>(body: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cur = body;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_str()
}

/// Error text: an explicit `error_log` field when the sender includes one
/// (simulations, log-forwarding proxies), otherwise a synthesized summary.
fn error_log_or(body: &Value, fallback: String) -> String {
    str_at(body, &["error_log"])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or(fallback)
}

pub fn github_failure(body: &Value, repo_path: &str) -> Option<FailureContext> {
    let conclusion = str_at(body, &["workflow_run", "conclusion"]);
    if conclusion != Some("failure") {
        return None;
    }
    let repo = str_at(body, &["repository", "full_name"]).unwrap_or("github/repo");
    let branch = str_at(body, &["workflow_run", "head_branch"]).unwrap_or("main");
    let workflow = str_at(body, &["workflow_run", "name"]).unwrap_or("workflow");
    Some(FailureContext {
        job_id: new_job_id(),
        repo: repo.to_string(),
        repo_path: repo_path.to_string(),
        provider: "github".to_string(),
        commit_sha: str_at(body, &["workflow_run", "head_sha"])
            .unwrap_or_default()
            .to_string(),
        branch: branch.to_string(),
        error_log: error_log_or(body, format!("GitHub Actions workflow '{workflow}' failed")),
        pipeline_url: str_at(body, &["workflow_run", "html_url"])
            .unwrap_or_default()
            .to_string(),
    })
}

pub fn gitlab_failure(body: &Value, repo_path: &str) -> Option<FailureContext> {
    if str_at(body, &["object_kind"]) != Some("pipeline")
        || str_at(body, &["object_attributes", "status"]) != Some("failed")
    {
        return None;
    }
    let repo = str_at(body, &["project", "path_with_namespace"])
        .or_else(|| str_at(body, &["repository", "name"]))
        .unwrap_or("gitlab/repo");
    let branch = str_at(body, &["object_attributes", "ref"]).unwrap_or("main");
    Some(FailureContext {
        job_id: new_job_id(),
        repo: repo.to_string(),
        repo_path: repo_path.to_string(),
        provider: "gitlab".to_string(),
        commit_sha: str_at(body, &["object_attributes", "sha"])
            .unwrap_or_default()
            .to_string(),
        branch: branch.rsplit('/').next().unwrap_or(branch).to_string(),
        error_log: error_log_or(body, "GitLab pipeline failed".to_string()),
        pipeline_url: str_at(body, &["object_attributes", "url"])
            .unwrap_or_default()
            .to_string(),
    })
}

pub fn jenkins_failure(body: &Value, repo_path: &str) -> Option<FailureContext> {
    if str_at(body, &["result"]) != Some("FAILURE") {
        return None;
    }
    let repo = str_at(body, &["repository", "name"]).unwrap_or("jenkins/repo");
    Some(FailureContext {
        job_id: new_job_id(),
        repo: repo.to_string(),
        repo_path: repo_path.to_string(),
        provider: "jenkins".to_string(),
        commit_sha: str_at(body, &["commit"]).unwrap_or_default().to_string(),
        branch: str_at(body, &["branch"]).unwrap_or("main").to_string(),
        error_log: error_log_or(body, "Jenkins build failed".to_string()),
        pipeline_url: str_at(body, &["build_url"]).unwrap_or_default().to_string(),
    })
}

pub fn circleci_failure(body: &Value, repo_path: &str) -> Option<FailureContext> {
    if str_at(body, &["status"]) != Some("failed") {
        return None;
    }
    let repo = str_at(body, &["repository_url"])
        .map(|u| u.trim_start_matches("https://github.com/"))
        .unwrap_or("circleci/repo");
    Some(FailureContext {
        job_id: new_job_id(),
        repo: repo.to_string(),
        repo_path: repo_path.to_string(),
        provider: "circleci".to_string(),
        commit_sha: str_at(body, &["vcs_revision"]).unwrap_or_default().to_string(),
        branch: str_at(body, &["branch"]).unwrap_or("main").to_string(),
        error_log: error_log_or(body, "CircleCI workflow failed".to_string()),
        pipeline_url: str_at(body, &["build_url"]).unwrap_or_default().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn github_failed_workflow_run_becomes_a_failure_context() {
        let body = json!({
            "repository": { "full_name": "acme/web-ui" },
            "workflow_run": {
                "conclusion": "failure",
                "head_branch": "develop",
                "head_sha": "deadbeef",
                "name": "ci",
                "html_url": "https://github.com/acme/web-ui/actions/runs/9"
            }
        });
        let ctx = github_failure(&body, "/srv/web-ui").expect("failure context");
        assert_eq!(ctx.repo, "acme/web-ui");
        assert_eq!(ctx.branch, "develop");
        assert_eq!(ctx.commit_sha, "deadbeef");
        assert_eq!(ctx.provider, "github");
        assert_eq!(ctx.repo_path, "/srv/web-ui");
        assert!(ctx.error_log.contains("ci"));
    }

    #[test]
    fn github_successful_run_is_ignored() {
        let body = json!({
            "repository": { "full_name": "acme/web-ui" },
            "workflow_run": { "conclusion": "success" }
        });
        assert!(github_failure(&body, "/srv/web-ui").is_none());
    }

    #[test]
    fn explicit_error_log_field_wins_over_the_summary() {
        let body = json!({
            "workflow_run": { "conclusion": "failure" },
            "error_log": "npm ERR! peer dep conflict"
        });
        let ctx = github_failure(&body, "/srv").expect("failure context");
        assert_eq!(ctx.error_log, "npm ERR! peer dep conflict");
    }

    #[test]
    fn gitlab_failed_pipeline_strips_the_ref_prefix() {
        let body = json!({
            "object_kind": "pipeline",
            "project": { "path_with_namespace": "acme/api" },
            "object_attributes": {
                "status": "failed",
                "ref": "refs/heads/main",
                "sha": "cafe",
                "url": "https://gitlab.com/acme/api/-/pipelines/3"
            }
        });
        let ctx = gitlab_failure(&body, "/srv/api").expect("failure context");
        assert_eq!(ctx.repo, "acme/api");
        assert_eq!(ctx.branch, "main");
        assert_eq!(ctx.provider, "gitlab");
    }

    #[test]
    fn gitlab_running_pipeline_is_ignored() {
        let body = json!({
            "object_kind": "pipeline",
            "object_attributes": { "status": "running" }
        });
        assert!(gitlab_failure(&body, "/srv").is_none());
    }

    #[test]
    fn jenkins_failure_result_is_ingested() {
        let body = json!({
            "result": "FAILURE",
            "repository": { "name": "acme/worker" },
            "branch": "main",
            "build_url": "https://jenkins.example.com/job/worker/12"
        });
        let ctx = jenkins_failure(&body, "/srv/worker").expect("failure context");
        assert_eq!(ctx.repo, "acme/worker");
        assert_eq!(ctx.pipeline_url, "https://jenkins.example.com/job/worker/12");
    }

    #[test]
    fn circleci_failed_status_is_ingested() {
        let body = json!({
            "status": "failed",
            "repository_url": "https://github.com/acme/web-ui",
            "branch": "main"
        });
        let ctx = circleci_failure(&body, "/srv").expect("failure context");
        assert_eq!(ctx.repo, "acme/web-ui");
    }

    #[test]
    fn job_ids_are_short_and_unique() {
        let a = new_job_id();
        let b = new_job_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }
}
