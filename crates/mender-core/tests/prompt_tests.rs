//! Prompt construction: truncation bounds and retry context.

use mender_core::prompt::{
    diagnosis_prompt, fix_prompt, head_chars, tail_chars, ERROR_EXCERPT, ERROR_LOG_HEAD,
};
use mender_core::types::{Diagnosis, FailureCategory, FailureContext, ValidationResult};

fn make_context(error_log: String) -> FailureContext {
    FailureContext {
        job_id: "j7x2m9k1".into(),
        repo: "acme/web-ui".into(),
        repo_path: "/repo".into(),
        provider: "github".into(),
        commit_sha: "abc123".into(),
        branch: "main".into(),
        error_log,
        pipeline_url: String::new(),
    }
}

fn make_diagnosis() -> Diagnosis {
    Diagnosis {
        failure_type: FailureCategory::ImportError,
        root_cause: "circular import between app and models".into(),
        affected_files: vec!["app.py".into()],
        error_summary: "Circular dependency detected.".into(),
        confidence: 0.8,
        suggested_approach: "move the import to function scope".into(),
    }
}

#[test]
fn head_and_tail_are_char_based() {
    // Each '€' is 3 UTF-8 bytes; char-based slicing must not split one.
    let s = "€".repeat(100);
    assert_eq!(head_chars(&s, 10).chars().count(), 10);
    assert_eq!(tail_chars(&s, 10).chars().count(), 10);
    assert_eq!(tail_chars("abcdef", 3), "def");
    assert_eq!(head_chars("abc", 10), "abc");
    assert_eq!(tail_chars("abc", 10), "abc");
}

#[test]
fn diagnosis_prompt_bounds_the_error_log() {
    let log = format!("{}LOG_TAIL_SENTINEL", "x".repeat(ERROR_LOG_HEAD));
    let prompt = diagnosis_prompt(&make_context(log));
    assert!(prompt.contains("acme/web-ui"));
    assert!(prompt.contains("failure_type"));
    assert!(
        !prompt.contains("LOG_TAIL_SENTINEL"),
        "text past the head bound must be dropped"
    );
}

#[test]
fn fix_prompt_uses_the_shorter_error_excerpt() {
    let log = format!("{}EXCERPT_SENTINEL", "x".repeat(ERROR_EXCERPT));
    let prompt = fix_prompt(&make_context(log), &make_diagnosis(), 0, None);
    assert!(prompt.contains("import_error"));
    assert!(prompt.contains("circular import"));
    assert!(!prompt.contains("EXCERPT_SENTINEL"));
}

#[test]
fn first_attempt_omits_previous_validation_output() {
    let prior = ValidationResult {
        passed: false,
        output: "PRIOR_OUTPUT".into(),
        duration_ms: 5,
        error: None,
    };
    let prompt = fix_prompt(
        &make_context("err".into()),
        &make_diagnosis(),
        0,
        Some(&prior),
    );
    assert!(!prompt.contains("Previous attempt failed"));
    assert!(!prompt.contains("PRIOR_OUTPUT"));
}

#[test]
fn retries_include_only_the_tail_of_the_previous_output() {
    let prior = ValidationResult {
        passed: false,
        output: format!("HEAD_MARK{}TAIL_MARK", "y".repeat(1_500)),
        duration_ms: 5,
        error: None,
    };
    let prompt = fix_prompt(
        &make_context("err".into()),
        &make_diagnosis(),
        1,
        Some(&prior),
    );
    assert!(prompt.contains("Previous attempt failed"));
    assert!(prompt.contains("TAIL_MARK"));
    assert!(
        !prompt.contains("HEAD_MARK"),
        "only the trailing excerpt is forwarded"
    );
}
