//! Smoother: final tone and transition pass. Sole producer of the candidate document.

use crate::error::StageError;
use crate::lesson::LessonDocument;
use crate::pipeline::stages::Stage;
use crate::pipeline::state::{GenerationState, StateDelta};
use crate::pipeline::StageKind;
use crate::prompt::{bullet_list, embed_document, strip_outer_fence};
use crate::provider::ModelHint;
use crate::usage::{MeteredClient, UsageMeter};
use async_trait::async_trait;
use tracing::debug;

pub struct Smoother {
    client: MeteredClient,
}

impl Smoother {
    pub fn new(client: MeteredClient) -> Self {
        Self { client }
    }

    pub fn prompt(state: &GenerationState, markdown: &str) -> String {
        format!(
            "ROLE: smoother\n\
             LESSON: {lesson}\n\
             ATTEMPT: {attempt}\n\
             Smooth the tone and the transitions between sections of this lesson.\n\
             Keep every heading, code block, citation marker and the References list as they are.\n\
             Style:\n{style}\n\
             Return the complete lesson as markdown and nothing else.\n\
             {document}\n",
            lesson = state.spec.lesson_id,
            attempt = state.attempt(),
            style = bullet_list(&state.spec.style),
            document = embed_document(markdown),
        )
    }
}

#[async_trait]
impl Stage for Smoother {
    fn kind(&self) -> StageKind {
        StageKind::Smoother
    }

    async fn execute(
        &self,
        state: &GenerationState,
        meter: &mut UsageMeter,
    ) -> Result<StateDelta, StageError> {
        let assembled = state
            .assembled
            .as_ref()
            .ok_or_else(|| StageError::terminal(StageKind::Smoother, "no assembled document"))?;
        let prompt = Self::prompt(state, &assembled.markdown);
        let completion = self
            .client
            .complete(meter, &prompt, ModelHint::Drafting)
            .await
            .map_err(|e| StageError::from_capability(StageKind::Smoother, e))?;

        let markdown = strip_outer_fence(&completion.text).trim();
        if markdown.is_empty() {
            return Err(StageError::retryable(StageKind::Smoother, "empty smoothed document"));
        }
        let document = LessonDocument::new(
            assembled.title.as_str(),
            format!("{}\n", markdown),
            assembled.citations.clone(),
        );
        debug!(
            lesson_id = %state.spec.lesson_id,
            words = document.word_count,
            fingerprint = %document.short_fingerprint(),
            "Candidate produced"
        );
        Ok(StateDelta::candidate(document))
    }
}
