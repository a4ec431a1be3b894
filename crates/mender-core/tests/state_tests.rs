//! Status graph and state-ownership invariants.

use mender_core::types::{ErrorKind, FailureContext, HealState, JobStatus};

fn make_context() -> FailureContext {
    FailureContext {
        job_id: "j7x2m9k1".into(),
        repo: "acme/web-ui".into(),
        repo_path: "/repo".into(),
        provider: "github".into(),
        commit_sha: "abc123".into(),
        branch: "main".into(),
        error_log: "error: something broke".into(),
        pipeline_url: "https://ci.example.com/run/1".into(),
    }
}

#[test]
fn new_state_starts_ingesting_with_zero_attempts() {
    let state = HealState::new(make_context(), 3);
    assert_eq!(state.status, JobStatus::Ingesting);
    assert_eq!(state.attempt, 0);
    assert_eq!(state.max_attempts, 3);
    assert!(state.errors.is_empty());
    assert!(state.diagnosis.is_none());
}

#[test]
fn max_attempts_is_clamped_to_at_least_one() {
    let state = HealState::new(make_context(), 0);
    assert_eq!(state.max_attempts, 1);
}

#[test]
fn happy_path_walks_the_full_graph() {
    let mut state = HealState::new(make_context(), 3);
    for status in [
        JobStatus::Diagnosing,
        JobStatus::Generating,
        JobStatus::Validating,
        JobStatus::Resolved,
        JobStatus::Done,
    ] {
        state.advance(status).expect("legal edge");
        assert_eq!(state.status, status);
    }
    assert!(state.status.is_terminal());
}

#[test]
fn retry_edge_from_validating_back_to_generating_is_legal() {
    let mut state = HealState::new(make_context(), 3);
    state.advance(JobStatus::Diagnosing).expect("diagnosing");
    state.advance(JobStatus::Generating).expect("generating");
    state.advance(JobStatus::Validating).expect("validating");
    state.advance(JobStatus::Generating).expect("retry edge");
    assert_eq!(state.status, JobStatus::Generating);
}

#[test]
fn escalation_is_reachable_from_both_routing_points() {
    let mut from_diagnose = HealState::new(make_context(), 3);
    from_diagnose
        .advance(JobStatus::Diagnosing)
        .expect("diagnosing");
    from_diagnose
        .advance(JobStatus::Escalating)
        .expect("escalate after diagnose");
    from_diagnose.advance(JobStatus::Failed).expect("failed");

    let mut from_validate = HealState::new(make_context(), 3);
    from_validate
        .advance(JobStatus::Diagnosing)
        .expect("diagnosing");
    from_validate
        .advance(JobStatus::Generating)
        .expect("generating");
    from_validate
        .advance(JobStatus::Validating)
        .expect("validating");
    from_validate
        .advance(JobStatus::Escalating)
        .expect("escalate after validate");
}

#[test]
fn illegal_transition_is_rejected_and_leaves_status_unchanged() {
    let mut state = HealState::new(make_context(), 3);
    let err = state.advance(JobStatus::Generating).expect_err("no skip");
    assert!(err.to_string().contains("illegal status transition"));
    assert_eq!(state.status, JobStatus::Ingesting);
}

#[test]
fn cannot_resolve_without_validating() {
    let mut state = HealState::new(make_context(), 3);
    state.advance(JobStatus::Diagnosing).expect("diagnosing");
    state.advance(JobStatus::Generating).expect("generating");
    assert!(state.advance(JobStatus::Resolved).is_err());
}

#[test]
fn terminal_statuses_have_no_outgoing_edges() {
    for terminal in [JobStatus::Done, JobStatus::Failed] {
        for to in [
            JobStatus::Ingesting,
            JobStatus::Diagnosing,
            JobStatus::Generating,
            JobStatus::Validating,
            JobStatus::Resolved,
            JobStatus::Escalating,
            JobStatus::Done,
            JobStatus::Failed,
        ] {
            assert!(
                !JobStatus::can_transition(terminal, to),
                "{terminal:?} -> {to:?} must be illegal"
            );
        }
    }
}

#[test]
fn error_log_is_append_only_and_ordered() {
    let mut state = HealState::new(make_context(), 3);
    state.record_error(ErrorKind::ServiceUnavailable, "first");
    state.record_error(ErrorKind::CheckFailure, "second");
    state.record_error(ErrorKind::ExhaustedRetries, "third");
    let messages: Vec<&str> = state.errors.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["first", "second", "third"]);
    assert_eq!(state.errors[1].kind, ErrorKind::CheckFailure);
}
