//! Planner: outline from spec, context and prior feedback.

use crate::error::{ApiError, StageError};
use crate::lesson::LessonSpec;
use crate::markdown::normalize_heading;
use crate::pipeline::artifacts::{Outline, OutlineSection};
use crate::pipeline::stages::Stage;
use crate::pipeline::state::{GenerationState, StateDelta};
use crate::pipeline::StageKind;
use crate::prompt::{bullet_list, extract_json_object, strip_outer_fence};
use crate::provider::ModelHint;
use crate::retrieval::ContextBundle;
use crate::usage::{MeteredClient, UsageMeter};
use async_trait::async_trait;
use tracing::debug;

const CONTEXT_EXCERPT_CHARS: usize = 400;

pub struct Planner {
    client: MeteredClient,
}

impl Planner {
    pub fn new(client: MeteredClient) -> Self {
        Self { client }
    }

    pub fn prompt(state: &GenerationState) -> String {
        let spec = &state.spec;
        let context = state
            .context
            .as_deref()
            .map(render_context)
            .unwrap_or_else(|| "- (none)".to_string());
        let feedback = state
            .feedback
            .as_ref()
            .map(|f| f.render())
            .unwrap_or_else(|| "None, this is the first attempt.".to_string());
        format!(
            "ROLE: planner\n\
             LESSON: {lesson}\n\
             ATTEMPT: {attempt}\n\
             Plan a lesson titled \"{title}\" of about {words} words.\n\
             Audience: {audience}\n\
             Objectives:\n{objectives}\n\
             Topics to cover:\n{topics}\n\
             Style:\n{style}\n\
             Sections that must appear:\n{required}\n\
             Course material (cite with the bracketed markers):\n{context}\n\
             Feedback on the previous attempt:\n{feedback}\n\
             Reply with one JSON object: {{\"title\": \"...\", \"sections\": \
             [{{\"heading\": \"...\", \"objectives\": [\"...\"], \"key_points\": [\"...\"]}}]}}\n",
            lesson = spec.lesson_id,
            attempt = state.attempt(),
            title = spec.title,
            words = spec.target_words,
            audience = spec.audience.as_deref().unwrap_or("general learners"),
            objectives = bullet_list(&spec.objectives),
            topics = bullet_list(&spec.topics),
            style = bullet_list(&spec.style),
            required = bullet_list(&spec.required_sections),
            context = context,
            feedback = feedback,
        )
    }

    /// Parse the model's outline and make it satisfy the spec's required sections.
    pub fn parse_outline(reply: &str, spec: &LessonSpec) -> Result<Outline, ApiError> {
        let body = strip_outer_fence(reply);
        let json = extract_json_object(body)
            .ok_or_else(|| ApiError::MalformedOutput("outline has no JSON object".to_string()))?;
        let mut outline: Outline = serde_json::from_str(json)
            .map_err(|e| ApiError::MalformedOutput(format!("outline: {}", e)))?;

        outline.sections.retain(|s| !s.heading.trim().is_empty());
        if outline.title.trim().is_empty() {
            outline.title = spec.title.clone();
        }
        for required in &spec.required_sections {
            let wanted = normalize_heading(required);
            let present = outline
                .sections
                .iter()
                .any(|s| normalize_heading(&s.heading).contains(&wanted));
            if !present {
                outline.sections.push(OutlineSection {
                    heading: required.clone(),
                    objectives: Vec::new(),
                    key_points: Vec::new(),
                });
            }
        }
        if outline.sections.is_empty() {
            return Err(ApiError::MalformedOutput("outline has no sections".to_string()));
        }
        Ok(outline)
    }
}

fn render_context(bundle: &ContextBundle) -> String {
    if bundle.chunks.is_empty() {
        return "- (none)".to_string();
    }
    bundle
        .chunks
        .iter()
        .map(|c| {
            let excerpt: String = c.text.chars().take(CONTEXT_EXCERPT_CHARS).collect();
            format!("{} ({}) {}", c.citation.marker, c.citation.source, excerpt)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Stage for Planner {
    fn kind(&self) -> StageKind {
        StageKind::Planner
    }

    async fn execute(
        &self,
        state: &GenerationState,
        meter: &mut UsageMeter,
    ) -> Result<StateDelta, StageError> {
        let prompt = Self::prompt(state);
        let completion = self
            .client
            .complete(meter, &prompt, ModelHint::Drafting)
            .await
            .map_err(|e| StageError::from_capability(StageKind::Planner, e))?;
        let outline = Self::parse_outline(&completion.text, &state.spec)
            .map_err(|e| StageError::terminal(StageKind::Planner, e.to_string()))?;
        debug!(
            lesson_id = %state.spec.lesson_id,
            sections = outline.sections.len(),
            "Outline planned"
        );
        Ok(StateDelta::outline(outline))
    }
}
