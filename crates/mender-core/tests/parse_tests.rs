//! The response adapter is the only place untrusted reasoning-service text
//! is turned into typed values; these tests exercise it without any
//! network or orchestrator involvement.

use mender_core::parse::{parse_diagnosis, parse_patchset, strip_code_fences, ParseError};
use mender_core::types::FailureCategory;

const DIAGNOSIS_JSON: &str = r#"{
  "failure_type": "dep_conflict",
  "root_cause": "lodash version mismatch between direct and transitive pins",
  "affected_files": ["package.json"],
  "error_summary": "Two incompatible lodash versions are requested. The resolver cannot satisfy both.",
  "confidence": 0.92,
  "suggested_approach": "pin lodash to a single compatible version"
}"#;

const PATCHSET_JSON: &str = r#"{
  "patches": [
    {
      "filename": "package.json",
      "original_content": "\"lodash\": \"^3.0.0\"",
      "patched_content": "\"lodash\": \"^4.17.21\"",
      "explanation": "align lodash with the transitive requirement"
    }
  ],
  "explanation": "update the direct lodash pin",
  "test_commands": ["npm test"],
  "confidence": 0.85
}"#;

fn diagnosis_with_confidence(confidence: f64) -> String {
    DIAGNOSIS_JSON.replace("0.92", &confidence.to_string())
}

// ── Fence stripping ──────────────────────────────────────────────────────

#[test]
fn strip_passes_unfenced_text_through() {
    assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
    assert_eq!(strip_code_fences("  {\"a\": 1}\n"), "{\"a\": 1}");
}

#[test]
fn strip_removes_fence_with_language_tag() {
    let fenced = format!("```json\n{DIAGNOSIS_JSON}\n```");
    assert_eq!(strip_code_fences(&fenced), DIAGNOSIS_JSON);
}

#[test]
fn strip_removes_fence_without_language_tag() {
    let fenced = format!("```\n{DIAGNOSIS_JSON}\n```");
    assert_eq!(strip_code_fences(&fenced), DIAGNOSIS_JSON);
}

#[test]
fn strip_handles_missing_closing_fence() {
    let fenced = format!("```json\n{DIAGNOSIS_JSON}");
    assert_eq!(strip_code_fences(&fenced), DIAGNOSIS_JSON);
}

#[test]
fn strip_is_pure() {
    let fenced = format!("```json\n{DIAGNOSIS_JSON}\n```");
    let first = strip_code_fences(&fenced).to_string();
    let second = strip_code_fences(&fenced).to_string();
    assert_eq!(first, second);
}

// ── Diagnosis parsing ────────────────────────────────────────────────────

#[test]
fn parses_plain_diagnosis() {
    let d = parse_diagnosis(DIAGNOSIS_JSON).expect("parse");
    assert_eq!(d.failure_type, FailureCategory::DepConflict);
    assert_eq!(d.affected_files, vec!["package.json"]);
    assert!((d.confidence - 0.92).abs() < f64::EPSILON);
}

#[test]
fn parses_fenced_diagnosis() {
    let fenced = format!("```json\n{DIAGNOSIS_JSON}\n```");
    let d = parse_diagnosis(&fenced).expect("parse fenced");
    assert_eq!(d.failure_type, FailureCategory::DepConflict);
}

#[test]
fn parsing_same_response_twice_yields_identical_values() {
    let fenced = format!("```json\n{DIAGNOSIS_JSON}\n```");
    let first = parse_diagnosis(&fenced).expect("first parse");
    let second = parse_diagnosis(&fenced).expect("second parse");
    assert_eq!(first, second);
}

#[test]
fn rejects_non_json_diagnosis() {
    let err = parse_diagnosis("the build failed because of reasons").expect_err("must fail");
    assert!(matches!(err, ParseError::Json(_)));
}

#[test]
fn rejects_unknown_failure_category() {
    let raw = DIAGNOSIS_JSON.replace("dep_conflict", "cosmic_rays");
    assert!(matches!(
        parse_diagnosis(&raw),
        Err(ParseError::Json(_))
    ));
}

#[test]
fn rejects_diagnosis_confidence_above_one() {
    let raw = diagnosis_with_confidence(1.5);
    assert!(matches!(
        parse_diagnosis(&raw),
        Err(ParseError::ConfidenceOutOfRange(_))
    ));
}

#[test]
fn rejects_diagnosis_confidence_below_zero() {
    let raw = diagnosis_with_confidence(-0.1);
    assert!(matches!(
        parse_diagnosis(&raw),
        Err(ParseError::ConfidenceOutOfRange(_))
    ));
}

#[test]
fn accepts_confidence_boundaries() {
    assert!(parse_diagnosis(&diagnosis_with_confidence(0.0)).is_ok());
    assert!(parse_diagnosis(&diagnosis_with_confidence(1.0)).is_ok());
}

// ── Patch set parsing ────────────────────────────────────────────────────

#[test]
fn parses_patchset() {
    let p = parse_patchset(PATCHSET_JSON).expect("parse");
    assert_eq!(p.patches.len(), 1);
    assert_eq!(p.patches[0].filename, "package.json");
    assert_eq!(p.test_commands, vec!["npm test"]);
}

#[test]
fn parses_fenced_patchset() {
    let fenced = format!("```json\n{PATCHSET_JSON}\n```");
    let p = parse_patchset(&fenced).expect("parse fenced");
    assert_eq!(p.patches.len(), 1);
}

#[test]
fn rejects_patchset_confidence_out_of_range() {
    let raw = PATCHSET_JSON.replace("0.85", "2.0");
    assert!(matches!(
        parse_patchset(&raw),
        Err(ParseError::ConfidenceOutOfRange(_))
    ));
}

#[test]
fn rejects_patchset_missing_fields() {
    assert!(matches!(
        parse_patchset(r#"{"patches": []}"#),
        Err(ParseError::Json(_))
    ));
}
