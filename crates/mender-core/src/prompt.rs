//! Prompt construction for the reasoning-service calls.
//!
//! The orchestrator owns every truncation bound so the prompts stay within
//! a predictable size regardless of how large the CI output is.

use crate::types::{Diagnosis, FailureContext, ValidationResult};

/// Max chars of raw error log sent with a diagnosis request.
pub const ERROR_LOG_HEAD: usize = 6_000;
/// Max chars of raw error log repeated in a fix-generation request.
pub const ERROR_EXCERPT: usize = 3_000;
/// Trailing chars of the previous validation output included on retries.
pub const PRIOR_OUTPUT_TAIL: usize = 1_000;

/// First `n` characters of `s` (char-based, multibyte safe).
pub fn head_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Last `n` characters of `s` (char-based, multibyte safe).
pub fn tail_chars(s: &str, n: usize) -> String {
    let total = s.chars().count();
    s.chars().skip(total.saturating_sub(n)).collect()
}

/// Diagnosis request: failure identity, bounded error log, and the exact
/// output schema the response must match.
pub fn diagnosis_prompt(context: &FailureContext) -> String {
    format!(
        "You are an expert DevOps engineer. Diagnose this CI failure.\n\n\
         Repository: {repo}\n\
         Branch: {branch}\n\
         Commit: {commit}\n\n\
         Error Log:\n```\n{log}\n```\n\n\
         Return ONLY valid JSON:\n\
         {{\n\
           \"failure_type\": \"one of: syntax_error|dep_conflict|type_error|import_error|test_failure|build_error|config_error|runtime_error\",\n\
           \"root_cause\": \"precise single sentence\",\n\
           \"affected_files\": [\"file1.py\", \"file2.js\"],\n\
           \"error_summary\": \"2-3 sentence human readable summary\",\n\
           \"confidence\": 0.85,\n\
           \"suggested_approach\": \"how to fix this\"\n\
         }}",
        repo = context.repo,
        branch = context.branch,
        commit = context.commit_sha,
        log = head_chars(&context.error_log, ERROR_LOG_HEAD),
    )
}

/// Fix-generation request: diagnosis fields plus a shorter error excerpt.
/// On retries the tail of the previous validation output is appended so the
/// generator does not repeat the identical failed fix.
pub fn fix_prompt(
    context: &FailureContext,
    diagnosis: &Diagnosis,
    attempt: u32,
    prior: Option<&ValidationResult>,
) -> String {
    let previous = match prior {
        Some(v) if attempt > 0 => format!(
            "\nPrevious attempt failed: {}\n",
            tail_chars(&v.output, PRIOR_OUTPUT_TAIL)
        ),
        _ => String::new(),
    };

    format!(
        "You are an expert DevOps engineer. Generate a minimal code fix for this CI failure.\n\n\
         Failure Type: {failure_type}\n\
         Root Cause: {root_cause}\n\
         Suggested Approach: {approach}\n\
         Error Log: {log}\n\
         {previous}\n\
         Return ONLY valid JSON:\n\
         {{\n\
           \"patches\": [\n\
             {{\n\
               \"filename\": \"path/to/file.py\",\n\
               \"original_content\": \"original code here\",\n\
               \"patched_content\": \"fixed code here\",\n\
               \"explanation\": \"what was changed and why\"\n\
             }}\n\
           ],\n\
           \"explanation\": \"overall explanation of the fix\",\n\
           \"test_commands\": [\"pytest\", \"npm test\"],\n\
           \"confidence\": 0.85\n\
         }}",
        failure_type = diagnosis.failure_type.as_str(),
        root_cause = diagnosis.root_cause,
        approach = diagnosis.suggested_approach,
        log = head_chars(&context.error_log, ERROR_EXCERPT),
        previous = previous,
    )
}
