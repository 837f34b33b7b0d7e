//! Tier 1: deterministic structural and statistical checks. No model calls.

use crate::evaluation::{CascadeConfig, Issue, Severity, Tier, TierOutcome, Verdict};
use crate::lesson::{LessonDocument, LessonSpec};
use crate::markdown::{self, normalize_heading};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicResult {
    pub score: f64,
    pub issues: Vec<Issue>,
    pub word_count: usize,
    pub readability: Option<f64>,
    pub topic_coverage: f64,
    pub outcome: TierOutcome,
}

impl HeuristicResult {
    pub fn has_critical(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }
}

/// 100 minus weighted issue counts, clamped to 0..=100.
pub fn score_issues(issues: &[Issue]) -> f64 {
    let penalty: f64 = issues.iter().map(|i| i.severity.weight()).sum();
    (100.0 - penalty).clamp(0.0, 100.0)
}

pub struct HeuristicFilter {
    config: CascadeConfig,
}

impl HeuristicFilter {
    pub fn new(config: CascadeConfig) -> Self {
        Self { config }
    }

    pub fn filter(&self, document: &LessonDocument, spec: &LessonSpec) -> HeuristicResult {
        let prose = markdown::prose_text(&document.markdown);
        let mut issues = Vec::new();

        self.check_length(document.word_count, spec.target_words, &mut issues);
        let readability = markdown::flesch_reading_ease(&prose);
        self.check_readability(readability, &mut issues);
        check_required_sections(&document.markdown, &spec.required_sections, &mut issues);
        let topic_coverage = self.check_topics(&prose, &spec.topics, &mut issues);
        issues.extend(check_markdown(&document.markdown));

        let score = score_issues(&issues);
        let has_critical = issues.iter().any(|i| i.severity == Severity::Critical);
        let outcome = self.decide(score, has_critical);

        HeuristicResult {
            score,
            issues,
            word_count: document.word_count,
            readability,
            topic_coverage,
            outcome,
        }
    }

    fn decide(&self, score: f64, has_critical: bool) -> TierOutcome {
        match (score, has_critical) {
            (s, false) if s >= self.config.pass_threshold => TierOutcome::Resolved {
                tier: Tier::Heuristic,
                verdict: Verdict::Accept,
                confidence: s / 100.0,
            },
            (s, _) if s < self.config.catastrophic_threshold => TierOutcome::Resolved {
                tier: Tier::Heuristic,
                verdict: Verdict::Regenerate,
                confidence: 1.0 - s / 100.0,
            },
            (s, true) => TierOutcome::Escalate {
                tier: Tier::Heuristic,
                reason: format!("score {:.0} with critical issues", s),
            },
            (s, false) => TierOutcome::Escalate {
                tier: Tier::Heuristic,
                reason: format!("score {:.0} below pass threshold", s),
            },
        }
    }

    /// Verdict from tier 1 alone, used when the paid tiers cannot answer.
    pub fn fallback_verdict(&self, result: &HeuristicResult) -> Verdict {
        if !result.has_critical() && result.score >= self.config.pass_threshold {
            Verdict::Accept
        } else {
            Verdict::Regenerate
        }
    }

    fn check_length(&self, words: usize, target: usize, issues: &mut Vec<Issue>) {
        let target_f = target as f64;
        let words_f = words as f64;
        if words_f < self.config.severe_word_ratio * target_f {
            issues.push(Issue::heuristic(
                Severity::Critical,
                "document",
                format!("Only {} words against a target of {}", words, target),
                "Expand every section to reach the target length",
            ));
        } else if words_f < self.config.min_word_ratio * target_f {
            issues.push(Issue::heuristic(
                Severity::Major,
                "document",
                format!("{} words is short of the {} word target", words, target),
                "Add explanation or examples to the thinnest sections",
            ));
        } else if words_f > self.config.max_word_ratio * target_f {
            issues.push(Issue::heuristic(
                Severity::Major,
                "document",
                format!("{} words overshoots the {} word target", words, target),
                "Tighten prose and remove repetition",
            ));
        }
    }

    fn check_readability(&self, readability: Option<f64>, issues: &mut Vec<Issue>) {
        let Some(score) = readability else {
            return;
        };
        if score < self.config.readability_min {
            issues.push(Issue::heuristic(
                Severity::Minor,
                "document",
                format!("Reading ease {:.0} is harder than the allowed range", score),
                "Shorten sentences and prefer plain words",
            ));
        } else if score > self.config.readability_max {
            issues.push(Issue::heuristic(
                Severity::Minor,
                "document",
                format!("Reading ease {:.0} is simpler than the allowed range", score),
                "Vary sentence structure and add precise terminology",
            ));
        }
    }

    fn check_topics(&self, prose: &str, topics: &[String], issues: &mut Vec<Issue>) -> f64 {
        if topics.is_empty() {
            return 1.0;
        }
        let haystack = prose.to_lowercase();
        let mut found = 0usize;
        for topic in topics {
            if haystack.contains(&topic.to_lowercase()) {
                found += 1;
            } else {
                issues.push(Issue::heuristic(
                    Severity::Minor,
                    format!("topic '{}'", topic),
                    format!("Topic '{}' is never mentioned", topic),
                    format!("Introduce and explain '{}'", topic),
                ));
            }
        }
        let coverage = found as f64 / topics.len() as f64;
        if coverage < self.config.min_topic_coverage {
            issues.push(Issue::heuristic(
                Severity::Major,
                "document",
                format!("Only {:.0}% of required topics are covered", coverage * 100.0),
                "Rework the outline around the required topics",
            ));
        }
        coverage
    }
}

fn check_required_sections(markdown_text: &str, required: &[String], issues: &mut Vec<Issue>) {
    let headings: Vec<String> = markdown::parse(markdown_text)
        .headings
        .iter()
        .map(|h| normalize_heading(&h.text))
        .collect();
    for section in required {
        let wanted = normalize_heading(section);
        if !headings.iter().any(|h| h == &wanted || h.contains(&wanted)) {
            issues.push(Issue::heuristic(
                Severity::Critical,
                format!("section '{}'", section),
                format!("Required section '{}' is missing", section),
                format!("Add a '{}' section", section),
            ));
        }
    }
}

const PLACEHOLDER_WORDS: [&str; 3] = ["TODO", "TBD", "FIXME"];
const PLACEHOLDER_MARKERS: [&str; 4] = ["{{", "[insert", "<placeholder", "lorem ipsum"];

fn has_placeholder(line: &str) -> bool {
    let word_hit = line
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| PLACEHOLDER_WORDS.contains(&word));
    let lower = line.to_lowercase();
    word_hit || PLACEHOLDER_MARKERS.iter().any(|m| lower.contains(m))
}

/// Markdown structure checks.
pub fn check_markdown(markdown_text: &str) -> Vec<Issue> {
    let outline = markdown::parse(markdown_text);
    let mut issues = Vec::new();

    // the first heading is measured against an implied H1
    let mut previous: Option<u8> = None;
    let mut top_level_seen = false;
    for heading in &outline.headings {
        let base = previous.unwrap_or(1);
        if heading.level > base + 1 {
            let description = match previous {
                Some(prev) => format!(
                    "Heading '{}' jumps from H{} to H{}",
                    heading.text, prev, heading.level
                ),
                None => format!(
                    "Document opens with H{} heading '{}'",
                    heading.level, heading.text
                ),
            };
            issues.push(Issue::heuristic(
                Severity::Critical,
                format!("line {}", heading.line),
                description,
                format!("Use H{} here", base + 1),
            ));
        }
        if heading.level == 1 {
            if top_level_seen {
                issues.push(Issue::heuristic(
                    Severity::Major,
                    format!("line {}", heading.line),
                    format!("Duplicate top-level heading '{}'", heading.text),
                    "Keep a single H1 title and demote the rest",
                ));
            }
            top_level_seen = true;
        }
        previous = Some(heading.level);
    }

    for fence in &outline.fences {
        let location = format!("line {}", fence.open_line);
        if fence.close_line.is_none() {
            issues.push(Issue::heuristic(
                Severity::Critical,
                location.clone(),
                "Code block is never closed",
                "Close the fence with a matching ``` line",
            ));
        }
        if fence.language.is_none() {
            issues.push(Issue::heuristic(
                Severity::Major,
                location.clone(),
                "Code block does not declare a language",
                "Add a language tag after the opening fence",
            ));
        }
        if !fence.blank_before || !fence.blank_after {
            issues.push(Issue::heuristic(
                Severity::Minor,
                location,
                "Code block is not separated by blank lines",
                "Put a blank line before and after the fence",
            ));
        }
    }

    for (line_no, line) in &outline.prose_lines {
        if has_placeholder(line) {
            issues.push(Issue::heuristic(
                Severity::Major,
                format!("line {}", line_no),
                "Unresolved placeholder text",
                "Replace the placeholder with real content",
            ));
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(target: usize) -> LessonSpec {
        LessonSpec {
            lesson_id: "l1".to_string(),
            title: "Loops".to_string(),
            target_words: target,
            audience: None,
            objectives: vec!["Write a loop".to_string()],
            topics: vec!["iteration".to_string()],
            style: Vec::new(),
            required_sections: vec!["Summary".to_string()],
        }
    }

    fn filler(words: usize) -> String {
        let sentence = "We use iteration to repeat a small step many times over.";
        let per = sentence.split_whitespace().count();
        std::iter::repeat(sentence)
            .take(words.div_ceil(per))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn heading_jump_is_one_critical_issue() {
        let issues = check_markdown("# Title\n\n### Too deep\n\nText.");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[0].location.as_deref(), Some("line 3"));
    }

    #[test]
    fn opening_below_h2_is_critical() {
        let issues = check_markdown("### Deep start\n\nText.");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[0].location.as_deref(), Some("line 1"));

        assert!(check_markdown("## Section\n\nText.").is_empty());
    }

    #[test]
    fn incrementing_headings_are_clean() {
        let md = "# Title\n\n## One\n\n### Detail\n\n## Two\n\nText.";
        assert!(check_markdown(md).is_empty());
    }

    #[test]
    fn fence_rules() {
        let md = "Intro\n```\nlet x = 1;\n```\nAfter";
        let issues = check_markdown(md);
        let severities: Vec<Severity> = issues.iter().map(|i| i.severity).collect();
        assert_eq!(severities, vec![Severity::Major, Severity::Minor]);

        let unclosed = check_markdown("Intro\n\n```rust\nlet x = 1;");
        assert_eq!(unclosed.len(), 1);
        assert_eq!(unclosed[0].severity, Severity::Critical);
    }

    #[test]
    fn placeholders_and_duplicate_titles_are_major() {
        let md = "# Title\n\nTODO: write this.\n\n# Title";
        let issues = check_markdown(md);
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.severity == Severity::Major));
        assert!(check_markdown("Stock today is fine.").is_empty());
    }

    #[test]
    fn clean_document_is_accepted_at_tier_one() {
        let body = filler(300);
        let md = format!("# Loops\n\n## Basics\n\n{}\n\n## Summary\n\nIteration wraps up.", body);
        let doc = LessonDocument::new("Loops", md, Vec::new());
        let result = HeuristicFilter::new(CascadeConfig::default()).filter(&doc, &spec(300));
        assert!(!result.has_critical());
        assert!(result.score >= 75.0, "score was {}", result.score);
        assert!(matches!(
            result.outcome,
            TierOutcome::Resolved {
                tier: Tier::Heuristic,
                verdict: Verdict::Accept,
                ..
            }
        ));
    }

    #[test]
    fn missing_section_escalates() {
        let body = filler(300);
        let md = format!("# Loops\n\n## Basics\n\n{}", body);
        let doc = LessonDocument::new("Loops", md, Vec::new());
        let result = HeuristicFilter::new(CascadeConfig::default()).filter(&doc, &spec(300));
        assert!(result.has_critical());
        assert!(matches!(
            result.outcome,
            TierOutcome::Escalate {
                tier: Tier::Heuristic,
                ..
            }
        ));
    }

    #[test]
    fn catastrophic_score_regenerates_without_escalating() {
        let md = "# A\n\n### B\n\n# C\n\n### D\n\n#### E\n\n###### F\n\nTODO";
        let doc = LessonDocument::new("A", md, Vec::new());
        let result = HeuristicFilter::new(CascadeConfig::default()).filter(&doc, &spec(300));
        assert!(result.score < 50.0, "score was {}", result.score);
        assert!(matches!(
            result.outcome,
            TierOutcome::Resolved {
                verdict: Verdict::Regenerate,
                ..
            }
        ));
    }

    #[test]
    fn score_is_clamped() {
        let issues: Vec<Issue> = (0..20)
            .map(|_| Issue::heuristic(Severity::Critical, "x", "y", "z"))
            .collect();
        assert_eq!(score_issues(&issues), 0.0);
        assert_eq!(score_issues(&[]), 100.0);
    }
}
