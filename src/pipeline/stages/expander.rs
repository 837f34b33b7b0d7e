//! Expander: prose for each outline section, one section at a time.

use crate::error::StageError;
use crate::pipeline::artifacts::{ExpandedSection, Outline, OutlineSection};
use crate::pipeline::stages::{tail_chars, Stage};
use crate::pipeline::state::{GenerationState, StateDelta};
use crate::pipeline::StageKind;
use crate::prompt::bullet_list;
use crate::provider::ModelHint;
use crate::usage::{MeteredClient, UsageMeter};
use async_trait::async_trait;
use tracing::debug;

const CONTEXT_PER_SECTION: usize = 3;

pub struct Expander {
    client: MeteredClient,
    continuity_chars: usize,
}

impl Expander {
    pub fn new(client: MeteredClient, continuity_chars: usize) -> Self {
        Self {
            client,
            continuity_chars,
        }
    }

    fn prompt(
        &self,
        state: &GenerationState,
        outline: &Outline,
        index: usize,
        previous: Option<&ExpandedSection>,
    ) -> String {
        let section: &OutlineSection = &outline.sections[index];
        let words = state.spec.target_words / outline.sections.len().max(1);
        let query = format!("{} {}", section.heading, section.key_points.join(" "));
        let context = state
            .context
            .as_deref()
            .map(|bundle| {
                bundle
                    .relevant_to(&query, CONTEXT_PER_SECTION)
                    .into_iter()
                    .map(|c| format!("{} {}", c.citation.marker, c.text))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let continuity = previous
            .map(|p| tail_chars(&p.body, self.continuity_chars).to_string())
            .unwrap_or_else(|| "(this is the first section)".to_string());
        let others: Vec<String> = outline
            .sections
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, s)| s.heading.clone())
            .collect();
        format!(
            "ROLE: expander\n\
             LESSON: {lesson}\n\
             ATTEMPT: {attempt}\n\
             SECTION: {heading}\n\
             INDEX: {position}/{total}\n\
             Write the body of this section of \"{title}\" in about {words} words of markdown.\n\
             Do not repeat the section heading. Sub-headings start at ###.\n\
             Section objectives:\n{objectives}\n\
             Key points:\n{points}\n\
             Style:\n{style}\n\
             Relevant material (cite with its marker):\n{context}\n\
             Other sections you may link as [[ref:Heading]]:\n{others}\n\
             The previous section ended with:\n{continuity}\n",
            lesson = state.spec.lesson_id,
            attempt = state.attempt(),
            heading = section.heading,
            position = index + 1,
            total = outline.sections.len(),
            title = outline.title,
            words = words,
            objectives = bullet_list(&section.objectives),
            points = bullet_list(&section.key_points),
            style = bullet_list(&state.spec.style),
            context = bullet_list(&context),
            others = bullet_list(&others),
            continuity = continuity,
        )
    }
}

#[async_trait]
impl Stage for Expander {
    fn kind(&self) -> StageKind {
        StageKind::Expander
    }

    async fn execute(
        &self,
        state: &GenerationState,
        meter: &mut UsageMeter,
    ) -> Result<StateDelta, StageError> {
        let outline = state
            .outline
            .as_ref()
            .ok_or_else(|| StageError::terminal(StageKind::Expander, "no outline to expand"))?;
        let mut sections: Vec<ExpandedSection> = Vec::with_capacity(outline.sections.len());

        for index in 0..outline.sections.len() {
            let prompt = self.prompt(state, outline, index, sections.last());
            let completion = self
                .client
                .complete(meter, &prompt, ModelHint::Drafting)
                .await
                .map_err(|e| StageError::from_capability(StageKind::Expander, e))?;
            let body = completion.text.trim().to_string();
            let heading = outline.sections[index].heading.clone();
            if body.is_empty() {
                return Err(StageError::retryable(
                    StageKind::Expander,
                    format!("empty body for section '{}'", heading),
                ));
            }
            debug!(section = %heading, chars = body.len(), "Section expanded");
            sections.push(ExpandedSection { heading, body });
        }

        Ok(StateDelta::sections(sections))
    }
}
