//! Shared test utilities for integration tests
//!
//! A scripted completion client that answers each prompt by its `ROLE` header, plus builders
//! for specs, documents and fully wired pipelines.

use async_trait::async_trait;
use lessonsmith::config::LessonsmithConfig;
use lessonsmith::error::ApiError;
use lessonsmith::lesson::LessonSpec;
use lessonsmith::pipeline::Pipeline;
use lessonsmith::prompt::header_value;
use lessonsmith::provider::{Completion, CompletionClient, ModelHint, TokenUsage};
use lessonsmith::retrieval::{ContextCache, CorpusSearch, InMemoryCorpus};
use lessonsmith::telemetry::{ProgressSink, TracingSink};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const COURSE: &str = "rust-101";

/// How the scripted model answers.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Smoothed document per attempt; the last one repeats.
    pub smoothed: Vec<String>,
    /// Judge rubric score, `None` when the judge is offline.
    pub judge: Option<f64>,
    /// Rubric score per ensemble rater id; absent raters are offline.
    pub raters: HashMap<String, f64>,
    /// Planner calls fail with a rate limit.
    pub planner_rate_limited: bool,
    /// Expander calls for this section fail with a rate limit.
    pub expander_rate_limited_on: Option<String>,
    /// Planner replies with prose from this attempt on.
    pub planner_prose_from_attempt: Option<usize>,
    /// Delay applied to every call.
    pub latency: Option<Duration>,
}

impl Script {
    pub fn smoothing(docs: &[String]) -> Self {
        Self {
            smoothed: docs.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_judge(mut self, score: f64) -> Self {
        self.judge = Some(score);
        self
    }

    pub fn with_rater(mut self, rater_id: &str, score: f64) -> Self {
        self.raters.insert(rater_id.to_string(), score);
        self
    }
}

/// Completion client replaying a [`Script`] and recording who was asked.
pub struct ScriptedClient {
    script: Script,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Roles (or rater ids, for rubric prompts) in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, who: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == who).count()
    }

    /// Every rubric call: judge, raters and tie-break.
    pub fn rubric_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| *c == "judge" || c.starts_with("rater-") || *c == "tie-break")
            .count()
    }

    fn rubric_reply(score: f64) -> String {
        format!(
            "{{\"clarity\": {s}, \"coverage\": {s}, \"pedagogy\": {s}, \"engagement\": {s}, \"issues\": []}}",
            s = score
        )
    }

    fn reply(&self, prompt: &str) -> Result<String, ApiError> {
        match header_value(prompt, "ROLE").unwrap_or_default() {
            "planner" => {
                self.calls.lock().push("planner".to_string());
                if self.script.planner_rate_limited {
                    return Err(ApiError::ProviderRateLimit("429".to_string()));
                }
                if let Some(from) = self.script.planner_prose_from_attempt {
                    if attempt(prompt) >= from {
                        return Ok("Here is how I would structure the lesson.".to_string());
                    }
                }
                Ok(r#"{"title": "Loops", "sections": [
                    {"heading": "Introduction", "objectives": ["Write a loop"], "key_points": ["iteration"]},
                    {"heading": "Summary", "objectives": [], "key_points": []}
                ]}"#
                .to_string())
            }
            "expander" => {
                self.calls.lock().push("expander".to_string());
                let section = header_value(prompt, "SECTION").unwrap_or("section");
                if self.script.expander_rate_limited_on.as_deref() == Some(section) {
                    return Err(ApiError::ProviderRateLimit("429".to_string()));
                }
                Ok(format!("{} {}", section, filler(40)))
            }
            "smoother" => {
                self.calls.lock().push("smoother".to_string());
                let idx = attempt(prompt).saturating_sub(1).min(self.script.smoothed.len().saturating_sub(1));
                self.script
                    .smoothed
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| ApiError::ProviderError("no scripted document".to_string()))
            }
            "lesson-judge" => {
                let rater = header_value(prompt, "RATER").unwrap_or("judge").to_string();
                self.calls.lock().push(rater.clone());
                let score = if rater == "judge" {
                    self.script.judge
                } else {
                    self.script.raters.get(&rater).copied()
                };
                score
                    .map(Self::rubric_reply)
                    .ok_or_else(|| ApiError::ProviderError(format!("{} offline", rater)))
            }
            other => Err(ApiError::ProviderError(format!("unexpected role '{}'", other))),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, prompt: &str, _hint: ModelHint) -> Result<Completion, ApiError> {
        if let Some(latency) = self.script.latency {
            tokio::time::sleep(latency).await;
        }
        let text = self.reply(prompt)?;
        Ok(Completion {
            text,
            model: "scripted".to_string(),
            usage: TokenUsage::new(200, 100),
        })
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

fn attempt(prompt: &str) -> usize {
    header_value(prompt, "ATTEMPT")
        .and_then(|a| a.parse().ok())
        .unwrap_or(1)
}

/// Every scripted completion bills this many tokens.
pub const TOKENS_PER_CALL: u64 = 300;

/// Sentences that read in range and mention the `iteration` topic.
pub fn filler(words: usize) -> String {
    let sentence = "We use iteration to repeat a small step many times over.";
    let per = sentence.split_whitespace().count();
    std::iter::repeat(sentence)
        .take(words.div_ceil(per))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn lesson_spec(lesson_id: &str) -> LessonSpec {
    LessonSpec {
        lesson_id: lesson_id.to_string(),
        title: "Loops".to_string(),
        target_words: 150,
        audience: Some("first-year students".to_string()),
        objectives: vec!["Write a loop".to_string()],
        topics: vec!["iteration".to_string()],
        style: vec!["friendly".to_string()],
        required_sections: vec!["Summary".to_string()],
    }
}

/// Passes every heuristic check against [`lesson_spec`].
pub fn clean_lesson() -> String {
    format!(
        "# Loops\n\n## Introduction\n\n{}\n\n## Summary\n\n{}\n",
        filler(66),
        filler(66)
    )
}

/// Far below the catastrophic threshold: short, placeholder-ridden, no summary.
pub fn broken_lesson() -> String {
    let mut doc = String::from("# Loops\n");
    for _ in 0..12 {
        doc.push_str("\nTODO\n");
    }
    doc
}

/// One heading jump (critical) and four untagged code blocks (major each): scores 78.
pub fn flawed_lesson() -> String {
    let snippet = "```\nfor i in 0..3 {}\n```";
    format!(
        "# Loops\n\n### Introduction\n\n{f}\n\n{s}\n\n{s}\n\n## Summary\n\n{f}\n\n{s}\n\n{s}\n",
        f = filler(66),
        s = snippet
    )
}

pub const FIVE_SECTIONS: [&str; 5] = [
    "Introduction",
    "Loops in practice",
    "Common mistakes",
    "Exercises",
    "Summary",
];

/// [`lesson_spec`] requiring five sections.
pub fn five_section_spec(lesson_id: &str) -> LessonSpec {
    LessonSpec {
        required_sections: FIVE_SECTIONS.iter().map(|s| s.to_string()).collect(),
        ..lesson_spec(lesson_id)
    }
}

pub fn five_section_lesson() -> String {
    let mut doc = String::from("# Loops\n");
    for heading in FIVE_SECTIONS {
        doc.push_str(&format!("\n## {}\n\n{}\n", heading, filler(33)));
    }
    doc
}

pub fn test_config() -> LessonsmithConfig {
    let mut config = LessonsmithConfig::default();
    config.pipeline.stage_backoff_ms = 1;
    config
}

pub fn pipeline(client: Arc<ScriptedClient>, config: &LessonsmithConfig) -> Pipeline {
    pipeline_with(client, config, Arc::new(InMemoryCorpus::new()), ContextCache::shared())
}

pub fn pipeline_with(
    client: Arc<ScriptedClient>,
    config: &LessonsmithConfig,
    corpus: Arc<dyn CorpusSearch>,
    cache: Arc<ContextCache>,
) -> Pipeline {
    Pipeline::assemble(
        config,
        client,
        corpus,
        cache,
        Arc::new(TracingSink) as Arc<dyn ProgressSink>,
    )
}
