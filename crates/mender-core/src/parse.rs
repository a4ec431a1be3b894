//! Defensive parsing of reasoning-service responses.
//!
//! Service responses are untrusted text. All fence stripping and schema
//! validation lives here, behind plain functions with no I/O, so the
//! adapter is testable without any network call.

use serde::de::DeserializeOwned;

use crate::types::{Diagnosis, PatchSet};

/// Why a response could not be turned into a typed value. Distinguishable
/// from transport failures, which never reach this module.
#[derive(Debug)]
pub enum ParseError {
    /// The fence-stripped text is not a JSON object matching the schema.
    Json(serde_json::Error),
    /// The payload parsed but carries a confidence outside [0,1].
    ConfidenceOutOfRange(f64),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(e) => write!(f, "response is not valid schema JSON: {e}"),
            Self::ConfidenceOutOfRange(c) => {
                write!(f, "confidence {c} outside [0,1]")
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Strip a surrounding code fence and an optional `json` language tag.
/// Text without a fence passes through untouched. Pure: no allocation,
/// same input always yields the same slice.
pub fn strip_code_fences(raw: &str) -> &str {
    let s = raw.trim();
    let Some(inner) = s.strip_prefix("```") else {
        return s;
    };
    let inner = match inner.find("```") {
        Some(end) => &inner[..end],
        None => inner,
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim()
}

fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    serde_json::from_str(strip_code_fences(raw)).map_err(ParseError::Json)
}

fn check_confidence(confidence: f64) -> Result<(), ParseError> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(ParseError::ConfidenceOutOfRange(confidence))
    }
}

/// Parse a diagnosis response, enforcing the confidence range.
pub fn parse_diagnosis(raw: &str) -> Result<Diagnosis, ParseError> {
    let diagnosis: Diagnosis = parse_json(raw)?;
    check_confidence(diagnosis.confidence)?;
    Ok(diagnosis)
}

/// Parse a fix-generation response, enforcing the confidence range.
pub fn parse_patchset(raw: &str) -> Result<PatchSet, ParseError> {
    let patchset: PatchSet = parse_json(raw)?;
    check_confidence(patchset.confidence)?;
    Ok(patchset)
}
