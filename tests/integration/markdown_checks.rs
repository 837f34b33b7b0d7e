//! Integration tests for the offline heuristic checks

use crate::integration::test_utils::*;
use lessonsmith::config::LessonsmithConfig;
use lessonsmith::evaluation::{check_markdown, HeuristicFilter, Severity, TierOutcome, Verdict};
use lessonsmith::lesson::LessonDocument;

fn filter() -> HeuristicFilter {
    HeuristicFilter::new(LessonsmithConfig::default().cascade)
}

#[test]
fn skipped_heading_level_is_exactly_one_critical() {
    let issues = check_markdown("# Loops\n\n### Details\n\nSome text.\n");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Critical);
}

#[test]
fn document_opening_at_h3_is_critical() {
    let issues = check_markdown("### Details\n\nSome text.\n\n#### More\n\nText.\n");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Critical);
    assert!(issues[0].description.contains("H3"));
}

#[test]
fn correctly_nested_headings_raise_nothing() {
    let md = "# Loops\n\n## While\n\n### Guards\n\nText.\n\n## For\n\n### Ranges\n\n#### Steps\n\nText.\n";
    assert!(check_markdown(md).is_empty());
}

#[test]
fn every_duplicate_title_is_reported() {
    let issues = check_markdown("# One\n\n# Two\n\n# Three\n");
    let majors = issues
        .iter()
        .filter(|i| i.severity == Severity::Major)
        .count();
    assert_eq!(majors, 2);
}

#[test]
fn headings_inside_code_are_not_headings() {
    let md = "# Loops\n\n```bash\n### not a heading\n```\n\n## Next\n";
    assert!(check_markdown(md).is_empty());
}

#[test]
fn clean_lesson_is_accepted_at_full_score() {
    let document = LessonDocument::new("Loops", clean_lesson(), Vec::new());
    let result = filter().filter(&document, &lesson_spec("loops"));
    assert_eq!(result.score, 100.0);
    assert!(result.issues.is_empty());
    assert_eq!(result.topic_coverage, 1.0);
    assert!(matches!(
        result.outcome,
        TierOutcome::Resolved {
            verdict: Verdict::Accept,
            ..
        }
    ));
}

#[test]
fn broken_lesson_is_sent_back_without_escalating() {
    let document = LessonDocument::new("Loops", broken_lesson(), Vec::new());
    let result = filter().filter(&document, &lesson_spec("loops"));
    assert!(result.score < 50.0);
    assert!(result.has_critical());
    assert!(matches!(
        result.outcome,
        TierOutcome::Resolved {
            verdict: Verdict::Regenerate,
            ..
        }
    ));
}

#[test]
fn critical_issue_with_passing_score_escalates() {
    let document = LessonDocument::new("Loops", flawed_lesson(), Vec::new());
    let filter = filter();
    let result = filter.filter(&document, &lesson_spec("loops"));
    assert_eq!(result.score, 78.0);
    assert_eq!(result.issues.len(), 5);
    assert!(matches!(result.outcome, TierOutcome::Escalate { .. }));
    assert_eq!(filter.fallback_verdict(&result), Verdict::Regenerate);
}

#[test]
fn missing_required_section_is_critical() {
    let md = format!("# Loops\n\n## Introduction\n\n{}\n", filler(140));
    let document = LessonDocument::new("Loops", md, Vec::new());
    let result = filter().filter(&document, &lesson_spec("loops"));
    let critical: Vec<_> = result
        .issues
        .iter()
        .filter(|i| i.severity == Severity::Critical)
        .collect();
    assert_eq!(critical.len(), 1);
    assert!(critical[0].description.contains("Summary"));
}
