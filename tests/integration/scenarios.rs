//! End-to-end runs through the four stages and the quality cascade.
//!
//! Tests cover:
//! - Acceptance at the free tier
//! - Regeneration after a catastrophic candidate
//! - Escalation through judge and ensemble with a tie-break
//! - The regeneration bound
//! - Degradation when model tiers are offline
//! - Stage-local retry exhaustion
//! - Cost booking for failed attempts
//! - Final verdicts after a late stage failure

use crate::integration::test_utils::*;
use lessonsmith::evaluation::Tier;
use lessonsmith::evaluation::Verdict;
use lessonsmith::pipeline::{FailureReason, RunPhase, StageKind};
use std::sync::Arc;

#[tokio::test]
async fn clean_candidate_is_accepted_without_model_evaluation() {
    let client = ScriptedClient::new(Script::smoothing(&[five_section_lesson()]));
    let pipeline = pipeline(client.clone(), &test_config());

    let report = pipeline.run(Arc::new(five_section_spec("loops")), COURSE).await;

    assert!(report.is_accepted());
    assert_eq!(report.attempts, 1);
    assert_eq!(report.retry_count, 0);
    assert_eq!(client.rubric_calls(), 0);
    // missing required sections are appended to the model's outline
    assert_eq!(client.count("expander"), 5);
    let evaluation = report.evaluation.as_ref().unwrap();
    assert_eq!(evaluation.tier_reached, Tier::Heuristic);
    assert_eq!(evaluation.score, 100.0);
    let document = report.document.as_ref().unwrap();
    assert!(document.markdown.starts_with("# Loops"));
    assert!(document.markdown.ends_with('\n'));
    assert_eq!(report.trace.first().unwrap().from, RunPhase::Init);
    assert_eq!(report.trace.last().unwrap().to, RunPhase::Accepted);
}

#[tokio::test]
async fn catastrophic_candidate_regenerates_for_free() {
    let client = ScriptedClient::new(Script::smoothing(&[broken_lesson(), clean_lesson()]));
    let pipeline = pipeline(client.clone(), &test_config());

    let report = pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;

    assert!(report.is_accepted());
    assert_eq!(report.attempts, 2);
    assert_eq!(report.retry_count, 1);
    assert_eq!(client.rubric_calls(), 0);
    assert_eq!(client.count("planner"), 2);
    assert!(report
        .trace
        .iter()
        .any(|e| e.from == RunPhase::Evaluating && e.to == RunPhase::Regenerating));
}

#[tokio::test]
async fn ambiguous_candidate_escalates_to_tie_broken_vote() {
    let script = Script::smoothing(&[flawed_lesson()])
        .with_judge(70.0)
        .with_rater("rater-1", 90.0)
        .with_rater("rater-2", 40.0)
        .with_rater("tie-break", 85.0);
    let client = ScriptedClient::new(script);
    let pipeline = pipeline(client.clone(), &test_config());

    let report = pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;

    assert!(report.is_accepted());
    assert_eq!(report.verdict, Some(Verdict::Accept));
    let evaluation = report.evaluation.as_ref().unwrap();
    assert_eq!(evaluation.tier_reached, Tier::Ensemble);
    assert_eq!(evaluation.trail.len(), 3);
    assert_eq!(evaluation.score, 85.0);
    assert_eq!(client.count("judge"), 1);
    assert_eq!(client.count("tie-break"), 1);
    assert_eq!(client.rubric_calls(), 4);
    assert!(evaluation.cost.tokens > 0);
}

#[tokio::test]
async fn regeneration_is_bounded_by_max_retries() {
    let client = ScriptedClient::new(Script::smoothing(&[broken_lesson()]));
    let pipeline = pipeline(client.clone(), &test_config());

    let report = pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;

    assert!(!report.is_accepted());
    assert_eq!(report.phase, RunPhase::Rejected);
    assert_eq!(report.attempts, 3);
    assert_eq!(report.retry_count, 3);
    assert_eq!(client.count("smoother"), 3);

    let failure = report.into_result().unwrap_err();
    assert_eq!(failure.reason, FailureReason::MaxRetriesExhausted);
    assert_eq!(failure.retry_count, 3);
    assert!(failure.last_candidate.is_some());
    assert!(!failure.issues.is_empty());
}

#[tokio::test]
async fn offline_judge_hands_over_to_the_ensemble() {
    let script = Script::smoothing(&[flawed_lesson()])
        .with_rater("rater-1", 85.0)
        .with_rater("rater-2", 80.0);
    let client = ScriptedClient::new(script);
    let pipeline = pipeline(client.clone(), &test_config());

    let report = pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;

    assert!(report.is_accepted());
    let evaluation = report.evaluation.as_ref().unwrap();
    assert_eq!(evaluation.tier_reached, Tier::Ensemble);
    assert!(evaluation.trail[1].outcome.starts_with("unavailable"));
    assert_eq!(client.count("tie-break"), 0);
}

#[tokio::test]
async fn offline_model_tiers_fall_back_to_the_heuristic_verdict() {
    let client = ScriptedClient::new(Script::smoothing(&[flawed_lesson()]));
    let mut config = test_config();
    config.pipeline.max_retries = 1;
    let pipeline = pipeline(client.clone(), &config);

    let report = pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;

    // a critical issue never passes on heuristics alone
    let evaluation = report.evaluation.as_ref().unwrap();
    assert_eq!(evaluation.verdict, Verdict::Regenerate);
    assert_eq!(evaluation.score, 78.0);
    assert_eq!(report.verdict, Some(Verdict::Reject));
    assert_eq!(
        report.failure.as_ref().map(|f| f.reason.clone()),
        Some(FailureReason::MaxRetriesExhausted)
    );
}

#[tokio::test]
async fn rate_limited_stage_exhausts_its_local_budget() {
    let script = Script {
        planner_rate_limited: true,
        ..Script::smoothing(&[clean_lesson()])
    };
    let client = ScriptedClient::new(script);
    let pipeline = pipeline(client.clone(), &test_config());

    let failure = pipeline
        .execute_lesson_generation(lesson_spec("loops"), COURSE)
        .await
        .unwrap_err();

    assert_eq!(
        failure.reason,
        FailureReason::StageBudgetExhausted {
            stage: StageKind::Planner,
            attempts: 3
        }
    );
    assert_eq!(failure.retry_count, 0);
    assert_eq!(client.count("planner"), 3);
    assert_eq!(client.count("expander"), 0);
}

#[tokio::test]
async fn failed_expansions_are_still_billed() {
    let script = Script {
        expander_rate_limited_on: Some("Summary".to_string()),
        ..Script::smoothing(&[clean_lesson()])
    };
    let client = ScriptedClient::new(script);
    let pipeline = pipeline(client.clone(), &test_config());

    let report = pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;

    // one outline plus "Introduction" on each of the three expander attempts
    assert_eq!(client.count("planner"), 1);
    assert_eq!(client.count("expander"), 6);
    assert_eq!(report.cost.tokens, 4 * TOKENS_PER_CALL);
    let traced: u64 = report.trace.iter().map(|e| e.tokens_delta).sum();
    assert_eq!(traced, report.cost.tokens);

    let failure = report.into_result().unwrap_err();
    assert_eq!(
        failure.reason,
        FailureReason::StageBudgetExhausted {
            stage: StageKind::Expander,
            attempts: 3
        }
    );
    assert_eq!(failure.cost.tokens, 4 * TOKENS_PER_CALL);
}

#[tokio::test]
async fn stage_failure_after_regeneration_reports_a_rejection() {
    let script = Script {
        planner_prose_from_attempt: Some(2),
        ..Script::smoothing(&[broken_lesson()])
    };
    let client = ScriptedClient::new(script);
    let pipeline = pipeline(client.clone(), &test_config());

    let report = pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;

    assert_eq!(report.phase, RunPhase::Rejected);
    assert_eq!(report.retry_count, 1);
    assert_eq!(report.verdict, Some(Verdict::Reject));
    // the first attempt's evaluation is still reported as it was
    assert_eq!(report.evaluation.as_ref().unwrap().verdict, Verdict::Regenerate);
    assert!(matches!(
        report.failure.as_ref().map(|f| &f.reason),
        Some(FailureReason::StageFailed {
            stage: StageKind::Planner,
            ..
        })
    ));
}

#[tokio::test]
async fn malformed_spec_is_rejected_before_any_call() {
    let client = ScriptedClient::new(Script::smoothing(&[clean_lesson()]));
    let pipeline = pipeline(client.clone(), &test_config());
    let mut spec = lesson_spec("loops");
    spec.title = "  ".to_string();

    let failure = pipeline
        .execute_lesson_generation(spec, COURSE)
        .await
        .unwrap_err();

    assert!(matches!(failure.reason, FailureReason::InvalidSpec { .. }));
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn trace_sequence_is_contiguous_and_costed() {
    let client = ScriptedClient::new(Script::smoothing(&[broken_lesson(), clean_lesson()]));
    let pipeline = pipeline(client, &test_config());

    let report = pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;

    for (idx, event) in report.trace.iter().enumerate() {
        assert_eq!(event.seq, idx as u64 + 1);
    }
    for pair in report.trace.windows(2) {
        assert_eq!(pair[0].to, pair[1].from);
        assert!(pair[0].retry_count <= pair[1].retry_count);
    }
    let traced: u64 = report.trace.iter().map(|e| e.tokens_delta).sum();
    assert_eq!(traced, report.cost.tokens);
}
