//! Property-based tests for scoring bounds and the regeneration bound

use lessonsmith::config::LessonsmithConfig;
use lessonsmith::evaluation::{HeuristicFilter, Verdict};
use lessonsmith::lesson::{LessonDocument, LessonSpec};
use lessonsmith::pipeline::transition::{next, PhaseEvent};
use lessonsmith::pipeline::{Patch, RunPhase, StageKind};
use lessonsmith::retrieval::CacheKey;
use proptest::prelude::*;

fn verdict() -> impl Strategy<Value = Verdict> {
    prop_oneof![
        Just(Verdict::Accept),
        Just(Verdict::Regenerate),
        Just(Verdict::Reject),
    ]
}

fn spec(target_words: usize, topics: Vec<String>) -> LessonSpec {
    LessonSpec {
        lesson_id: "l1".to_string(),
        title: "Loops".to_string(),
        target_words,
        audience: None,
        objectives: vec!["Write a loop".to_string()],
        topics,
        style: Vec::new(),
        required_sections: vec!["Summary".to_string()],
    }
}

/// Heuristic scores stay within 0..=100 whatever the document looks like.
#[test]
fn test_heuristic_score_is_bounded() {
    let filter = HeuristicFilter::new(LessonsmithConfig::default().cascade);
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(
                "(#{1,6} [a-z]{1,8}\n|```[a-z]{0,4}\n|TODO\n|[a-z ,.]{0,60}\n){0,40}",
                1usize..3000,
                proptest::collection::vec("[a-z]{3,8}", 0..5),
            ),
            |(markdown, target, topics)| {
                let document = LessonDocument::new("Loops", markdown, Vec::new());
                let result = filter.filter(&document, &spec(target, topics));
                prop_assert!((0.0..=100.0).contains(&result.score));
                prop_assert!((0.0..=1.0).contains(&result.topic_coverage));
                Ok(())
            },
        )
        .unwrap();
}

/// Walk evaluation outcomes through the transition function: the retry counter only moves
/// forward by one, and the run never re-enters planning once the bound is reached.
#[test]
fn test_regeneration_is_bounded() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(1u32..6, proptest::collection::vec(verdict(), 1..12)),
            |(max_retries, verdicts)| {
                let mut phase = RunPhase::Init;
                let mut retry = 0u32;
                let mut evaluations = 0u32;
                for verdict in verdicts {
                    if phase.is_terminal() {
                        break;
                    }
                    let t = next(phase, PhaseEvent::Begin, retry, max_retries).unwrap();
                    prop_assert_eq!(t.to, RunPhase::Planning);
                    phase = t.to;
                    for stage in StageKind::ORDER {
                        phase = next(phase, PhaseEvent::StageCompleted(stage), retry, max_retries)
                            .unwrap()
                            .to;
                    }
                    let t = next(phase, PhaseEvent::Evaluated(verdict), retry, max_retries).unwrap();
                    evaluations += 1;
                    prop_assert!(t.retry_count == retry || t.retry_count == retry + 1);
                    prop_assert!(t.retry_count <= max_retries);
                    if t.to == RunPhase::Regenerating {
                        prop_assert!(t.retry_count < max_retries);
                    }
                    retry = t.retry_count;
                    phase = t.to;
                }
                prop_assert!(evaluations <= max_retries);
                Ok(())
            },
        )
        .unwrap();
}

proptest! {
    /// Distinct (course, lesson) pairs never share a storage key.
    #[test]
    fn storage_keys_are_injective(
        a in ("[a-z:0-9]{0,6}", "[a-z:0-9]{0,6}"),
        b in ("[a-z:0-9]{0,6}", "[a-z:0-9]{0,6}"),
    ) {
        let ka = CacheKey::new(a.0.clone(), a.1.clone());
        let kb = CacheKey::new(b.0.clone(), b.1.clone());
        prop_assert_eq!(a == b, ka.storage_key() == kb.storage_key());
    }

    /// `Keep` leaves the slot alone; `Clear` always empties it.
    #[test]
    fn patch_semantics(initial in proptest::option::of(0u32..100), value in 0u32..100) {
        let mut slot = initial;
        Patch::Keep.apply(&mut slot);
        prop_assert_eq!(slot, initial);
        Patch::Set(value).apply(&mut slot);
        prop_assert_eq!(slot, Some(value));
        Patch::<u32>::Clear.apply(&mut slot);
        prop_assert_eq!(slot, None);
    }
}
