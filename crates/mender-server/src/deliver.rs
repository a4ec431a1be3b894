//! Fix delivery: turn a validated patch set into a pull request.
//!
//! Works in a temporary git worktree so the watched working tree is never
//! dirtied. A delivery failure after successful validation is reported to
//! the caller, never escalated.

use std::path::Path;

use anyhow::{Context, Result};
use mender_core::config::Config;
use mender_core::types::HealState;
use tokio::process::Command;
use tracing::{info, warn};

struct CmdOutput {
    stdout: String,
    stderr: String,
    success: bool,
}

async fn run(dir: &Path, program: &str, args: &[&str]) -> Result<CmdOutput> {
    let out = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("run {program}"))?;
    Ok(CmdOutput {
        stdout: String::from_utf8_lossy(&out.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        success: out.status.success(),
    })
}

async fn git_ok(dir: &Path, args: &[&str]) -> Result<()> {
    let out = run(dir, "git", args).await?;
    if !out.success {
        anyhow::bail!("git {} failed: {}", args.join(" "), out.stderr);
    }
    Ok(())
}

/// Create branch, commit the validated patches, push, open a PR via the
/// `gh` CLI. Returns the PR URL.
pub async fn deliver_fix(config: &Config, state: &HealState) -> Result<String> {
    let diagnosis = state
        .diagnosis
        .as_ref()
        .context("resolved job has no diagnosis")?;
    let fix = state.fix.as_ref().context("resolved job has no patch set")?;

    let short_id: String = state.context.job_id.chars().take(8).collect();
    let branch = format!("mender/fix/{}/{short_id}", diagnosis.failure_type.as_str());
    let repo = Path::new(&config.repo_path);
    let wt_dir = std::env::temp_dir().join(format!("mender-deliver-{short_id}"));

    info!(job_id = %state.context.job_id, branch = %branch, "delivering fix");

    let result = create_pr(config, state, repo, &wt_dir, &branch).await;

    // Best-effort worktree cleanup on every path; the PR (if created) survives.
    let wt_str = wt_dir.to_string_lossy().into_owned();
    let _ = run(repo, "git", &["worktree", "remove", "--force", &wt_str]).await;
    let _ = run(repo, "git", &["worktree", "prune"]).await;
    std::fs::remove_dir_all(&wt_dir).ok();

    let fix_summary = fix.explanation.chars().take(100).collect::<String>();
    match &result {
        Ok(url) => info!(job_id = %state.context.job_id, pr_url = %url, fix = %fix_summary, "PR created"),
        Err(e) => warn!(job_id = %state.context.job_id, "delivery failed: {e:#}"),
    }
    result
}

async fn create_pr(
    config: &Config,
    state: &HealState,
    repo: &Path,
    wt_dir: &Path,
    branch: &str,
) -> Result<String> {
    let diagnosis = state
        .diagnosis
        .as_ref()
        .context("resolved job has no diagnosis")?;
    let fix = state.fix.as_ref().context("resolved job has no patch set")?;
    let wt_str = wt_dir.to_string_lossy().into_owned();

    // Stale branch/worktree from a crashed earlier delivery.
    let _ = run(repo, "git", &["worktree", "remove", "--force", &wt_str]).await;
    let _ = run(repo, "git", &["branch", "-D", branch]).await;

    git_ok(
        repo,
        &["worktree", "add", &wt_str, "-b", branch, &config.base_branch],
    )
    .await?;

    for patch in &fix.patches {
        let target = wt_dir.join(&patch.filename);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        std::fs::write(&target, &patch.patched_content)
            .with_context(|| format!("write {}", patch.filename))?;
    }

    git_ok(wt_dir, &["add", "-A"]).await?;
    let commit_msg = format!("fix: {}", diagnosis.root_cause.chars().take(72).collect::<String>());
    git_ok(wt_dir, &["commit", "-m", &commit_msg]).await?;
    git_ok(wt_dir, &["push", "-u", "origin", branch]).await?;

    let title = format!("Auto-fix: {}", diagnosis.failure_type.as_str());
    let sandbox_report = state
        .validation
        .as_ref()
        .map(|v| v.output.clone())
        .unwrap_or_default();
    let body = format!(
        "## Automated fix\n\n\
         **Failure Type:** {failure_type}\n\
         **Root Cause:** {root_cause}\n\
         **Job ID:** {job_id}\n\n\
         {explanation}\n\n\
         ## Sandbox validation\n```\n{report}\n```\n",
        failure_type = diagnosis.failure_type.as_str(),
        root_cause = diagnosis.root_cause,
        job_id = state.context.job_id,
        explanation = fix.explanation,
        report = sandbox_report,
    );

    let pr = run(
        wt_dir,
        "gh",
        &[
            "pr",
            "create",
            "--base",
            &config.base_branch,
            "--head",
            branch,
            "--title",
            &title,
            "--body",
            &body,
        ],
    )
    .await?;
    if !pr.success {
        anyhow::bail!("gh pr create failed: {}", pr.stderr);
    }
    Ok(pr.stdout)
}
