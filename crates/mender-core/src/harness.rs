//! Isolated validation harness.
//!
//! Verifies a candidate patch set against a disposable copy of the
//! repository. The source tree is only ever read; each run owns a scratch
//! directory that is removed on every exit path, including check timeouts
//! and internal errors, via the scratch handle's drop guard.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::types::{FailureCategory, PatchSet, ValidationResult};

/// Which stack segments a validation run exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TechStack {
    Backend,
    Frontend,
    Fullstack,
}

impl TechStack {
    /// Parse from env/config string. Unrecognised values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "backend" => Some(Self::Backend),
            "frontend" => Some(Self::Frontend),
            "fullstack" => Some(Self::Fullstack),
            _ => None,
        }
    }

    fn wants(&self, segment: &StackSegment) -> bool {
        match self {
            Self::Fullstack => true,
            Self::Backend => segment.dir == "backend",
            Self::Frontend => segment.dir == "frontend",
        }
    }
}

pub const CHECK_TIMEOUT_S: u64 = 10;
pub const PIP_INSTALL_TIMEOUT_S: u64 = 30;
pub const NPM_INSTALL_TIMEOUT_S: u64 = 60;

/// One verification command, declaratively. New stacks and checks are
/// additions to the `SEGMENTS` data, not new orchestration code.
#[derive(Debug, Clone)]
pub struct CheckSpec {
    pub label: &'static str,
    pub program: &'static str,
    pub args: &'static [&'static str],
    /// Path (relative to the segment dir) that must exist for the check to
    /// run; absent means the check is skipped, not failed.
    pub requires: Option<&'static str>,
    pub timeout_s: u64,
    /// Restricts the check to specific failure categories (None = always).
    pub categories: Option<&'static [FailureCategory]>,
}

struct StackSegment {
    name: &'static str,
    /// Project directory inside the repository copy.
    dir: &'static str,
    checks: &'static [CheckSpec],
}

const PYTHON_CHECKS: &[CheckSpec] = &[
    CheckSpec {
        label: "install python dependencies",
        program: "pip",
        args: &["install", "-q", "-r", "requirements.txt"],
        requires: Some("requirements.txt"),
        timeout_s: PIP_INSTALL_TIMEOUT_S,
        categories: None,
    },
    CheckSpec {
        label: "python syntax check",
        program: "python",
        args: &["-m", "compileall", "-q", "."],
        requires: None,
        timeout_s: CHECK_TIMEOUT_S,
        categories: None,
    },
    CheckSpec {
        label: "pip dependency resolution",
        program: "pip",
        args: &["check"],
        requires: Some("requirements.txt"),
        timeout_s: CHECK_TIMEOUT_S,
        categories: Some(&[FailureCategory::DepConflict]),
    },
];

const NODE_CHECKS: &[CheckSpec] = &[
    CheckSpec {
        label: "install node dependencies",
        program: "npm",
        args: &["install", "--silent"],
        requires: Some("package.json"),
        timeout_s: NPM_INSTALL_TIMEOUT_S,
        categories: None,
    },
    CheckSpec {
        label: "node syntax check",
        program: "node",
        args: &["--check", "index.js"],
        requires: Some("index.js"),
        timeout_s: CHECK_TIMEOUT_S,
        categories: None,
    },
    CheckSpec {
        label: "node syntax check (src)",
        program: "node",
        args: &["--check", "src/index.js"],
        requires: Some("src/index.js"),
        timeout_s: CHECK_TIMEOUT_S,
        categories: None,
    },
];

const SEGMENTS: &[StackSegment] = &[
    StackSegment {
        name: "python",
        dir: "backend",
        checks: PYTHON_CHECKS,
    },
    StackSegment {
        name: "nodejs",
        dir: "frontend",
        checks: NODE_CHECKS,
    },
];

// ── Results ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub segment: &'static str,
    pub label: String,
    pub exit_code: Option<i32>,
    pub output: String,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub passed: bool,
}

impl CheckResult {
    fn skipped(segment: &StackSegment) -> Self {
        Self {
            segment: segment.name,
            label: format!("no {} project present - skipped", segment.dir),
            exit_code: None,
            output: String::new(),
            timed_out: false,
            duration_ms: 0,
            passed: true,
        }
    }
}

/// Machine-readable verdict of one validation run.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxReport {
    /// False only when the isolated copy could not be created.
    pub tested: bool,
    pub passed: bool,
    pub checks: Vec<CheckResult>,
    pub total_duration_ms: u64,
    pub error: Option<String>,
}

impl SandboxReport {
    fn setup_failure(error: String, duration: Duration) -> Self {
        Self {
            tested: false,
            passed: false,
            checks: Vec::new(),
            total_duration_ms: duration.as_millis() as u64,
            error: Some(error),
        }
    }

    /// Formatted human-readable report, suitable for PR bodies and logs.
    pub fn render(&self) -> String {
        let mut report = String::from("==== SANDBOX TEST REPORT ====\n");
        if !self.tested {
            report.push_str("sandbox setup failed\n");
            if let Some(err) = &self.error {
                report.push_str(&format!("error: {err}\n"));
            }
            return report;
        }
        report.push_str(if self.passed {
            "ALL CHECKS PASSED\n"
        } else {
            "SOME CHECKS FAILED\n"
        });
        report.push_str(&format!("duration: {}ms\n", self.total_duration_ms));
        for check in &self.checks {
            let status = if check.timed_out {
                "timeout"
            } else if check.passed {
                "ok"
            } else {
                "failed"
            };
            report.push_str(&format!("\n[{}] {} - {status}\n", check.segment, check.label));
            if !check.output.is_empty() {
                report.push_str(&check.output);
                report.push('\n');
            }
        }
        report
    }

    pub fn to_validation_result(&self) -> ValidationResult {
        ValidationResult {
            passed: self.passed,
            output: self.render(),
            duration_ms: self.total_duration_ms,
            error: self.error.clone(),
        }
    }
}

/// Overall pass = AND across every executed check.
pub fn aggregate(checks: Vec<CheckResult>, total: Duration) -> SandboxReport {
    let passed = checks.iter().all(|c| c.passed);
    SandboxReport {
        tested: true,
        passed,
        checks,
        total_duration_ms: total.as_millis() as u64,
        error: if passed {
            None
        } else {
            Some("some checks failed".to_string())
        },
    }
}

// ── Scratch directory ────────────────────────────────────────────────────

/// Disposable sandbox holding the repository copy. Dropping removes the
/// scratch parent and everything under it on every exit path; `close`
/// removes it eagerly so failures can be logged.
pub struct Scratch {
    temp: TempDir,
    copy: PathBuf,
}

impl Scratch {
    /// Create the scratch dir and deep-copy the repository into it,
    /// excluding volatile and secret artifacts.
    pub fn prepare(source: &Path, job_id: &str) -> Result<Self> {
        let short: String = job_id.chars().take(8).collect();
        let temp = tempfile::Builder::new()
            .prefix(&format!("mender-sandbox-{short}-"))
            .tempdir()
            .context("create scratch dir")?;
        let copy = temp.path().join("repo");
        copy_tree(source, &copy).context("copy repository into sandbox")?;
        Ok(Self { temp, copy })
    }

    pub fn copy_path(&self) -> &Path {
        &self.copy
    }

    pub fn close(self) {
        let path = self.temp.path().to_path_buf();
        match self.temp.close() {
            Ok(()) => info!(sandbox = %path.display(), "sandbox removed"),
            Err(e) => warn!(sandbox = %path.display(), "failed to remove sandbox: {e}"),
        }
    }
}

const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    "dist",
    ".next",
];

fn is_excluded(name: &str) -> bool {
    EXCLUDED_DIRS.contains(&name) || name.starts_with(".env") || name.ends_with(".pyc")
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let walker = WalkDir::new(src).into_iter().filter_entry(|e| {
        e.depth() == 0 || !is_excluded(&e.file_name().to_string_lossy())
    });
    for entry in walker {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
        // Symlinks are not carried into the sandbox.
    }
    Ok(())
}

/// Write the candidate patch contents into the copy. Paths must stay
/// inside the sandbox; anything absolute or parent-escaping is rejected.
pub fn apply_patches(copy: &Path, fix: &PatchSet) -> Result<()> {
    for patch in &fix.patches {
        let rel = Path::new(&patch.filename);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            anyhow::bail!("patch path escapes the sandbox: {}", patch.filename);
        }
        let target = copy.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        std::fs::write(&target, &patch.patched_content)
            .with_context(|| format!("write {}", patch.filename))?;
    }
    Ok(())
}

// ── Check execution ──────────────────────────────────────────────────────

/// Run one check under its timeout. A timeout is recorded as that check's
/// failure with a timeout marker, never as a harness-level error.
pub async fn run_check(dir: &Path, segment: &'static str, spec: &CheckSpec) -> CheckResult {
    let started = Instant::now();
    let label = spec.label.to_string();
    let mut cmd = Command::new(spec.program);
    cmd.args(spec.args).current_dir(dir).kill_on_drop(true);

    match tokio::time::timeout(Duration::from_secs(spec.timeout_s), cmd.output()).await {
        Err(_) => {
            warn!(segment, check = spec.label, timeout_s = spec.timeout_s, "check timed out");
            CheckResult {
                segment,
                label,
                exit_code: None,
                output: format!("timeout after {}s", spec.timeout_s),
                timed_out: true,
                duration_ms: started.elapsed().as_millis() as u64,
                passed: false,
            }
        }
        Ok(Err(e)) => CheckResult {
            segment,
            label,
            exit_code: None,
            output: format!("failed to run: {e}"),
            timed_out: false,
            duration_ms: started.elapsed().as_millis() as u64,
            passed: false,
        },
        Ok(Ok(out)) => {
            let mut output = String::from_utf8_lossy(&out.stdout).trim_end().to_string();
            let stderr = String::from_utf8_lossy(&out.stderr);
            let stderr = stderr.trim_end();
            if !stderr.is_empty() {
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(stderr);
            }
            CheckResult {
                segment,
                label,
                exit_code: out.status.code(),
                output,
                timed_out: false,
                duration_ms: started.elapsed().as_millis() as u64,
                passed: out.status.success(),
            }
        }
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

pub struct ValidationHarness {
    pub tech_stack: TechStack,
}

impl ValidationHarness {
    pub fn new(tech_stack: TechStack) -> Self {
        Self { tech_stack }
    }

    /// Full validation run: prepare the isolated copy, apply the candidate
    /// patches, execute the applicable checks, aggregate, clean up.
    /// Never panics or errors past this boundary; a setup failure is
    /// reported as `tested=false, passed=false`.
    pub async fn verify(
        &self,
        repo_path: &Path,
        fix: &PatchSet,
        category: FailureCategory,
        job_id: &str,
    ) -> SandboxReport {
        let started = Instant::now();

        let scratch = match Scratch::prepare(repo_path, job_id) {
            Ok(s) => s,
            Err(e) => {
                warn!(job_id = %job_id, "sandbox setup failed: {e:#}");
                return SandboxReport::setup_failure(
                    format!("failed to create sandbox: {e:#}"),
                    started.elapsed(),
                );
            }
        };
        info!(job_id = %job_id, sandbox = %scratch.copy_path().display(), "sandbox created");

        let report = match apply_patches(scratch.copy_path(), fix) {
            Err(e) => SandboxReport {
                tested: true,
                passed: false,
                checks: Vec::new(),
                total_duration_ms: started.elapsed().as_millis() as u64,
                error: Some(format!("failed to apply patches: {e:#}")),
            },
            Ok(()) => {
                let checks = self.run_checks(scratch.copy_path(), category).await;
                aggregate(checks, started.elapsed())
            }
        };

        scratch.close();
        report
    }

    /// Execute every applicable check for the requested stack segments.
    /// A requested segment whose project directory is absent in the copy
    /// yields a trivial pass, not a failure.
    pub async fn run_checks(&self, copy: &Path, category: FailureCategory) -> Vec<CheckResult> {
        let mut results = Vec::new();
        for segment in SEGMENTS {
            if !self.tech_stack.wants(segment) {
                continue;
            }
            let seg_dir = copy.join(segment.dir);
            if !seg_dir.is_dir() {
                info!(segment = segment.name, "segment project absent, trivial pass");
                results.push(CheckResult::skipped(segment));
                continue;
            }
            for spec in segment.checks {
                if let Some(cats) = spec.categories {
                    if !cats.contains(&category) {
                        continue;
                    }
                }
                if let Some(required) = spec.requires {
                    if !seg_dir.join(required).exists() {
                        continue;
                    }
                }
                results.push(run_check(&seg_dir, segment.name, spec).await);
            }
        }
        results
    }
}
