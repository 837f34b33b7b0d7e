//! Assembler: deterministic merge of expanded sections into one markdown document.

use crate::error::StageError;
use crate::lesson::Citation;
use crate::markdown::{normalize_heading, parse_heading};
use crate::pipeline::artifacts::{AssembledDocument, ExpandedSection};
use crate::pipeline::stages::Stage;
use crate::pipeline::state::{GenerationState, StateDelta};
use crate::pipeline::StageKind;
use crate::retrieval::ContextBundle;
use crate::usage::UsageMeter;
use async_trait::async_trait;

const REF_OPEN: &str = "[[ref:";
const REF_CLOSE: &str = "]]";
/// Body headings start below the numbered H2 section headings.
const BODY_HEADING_BASE: usize = 3;

pub struct Assembler;

struct SectionIndex(Vec<String>);

impl SectionIndex {
    fn resolve(&self, target: &str) -> Option<usize> {
        let wanted = normalize_heading(target);
        if wanted.is_empty() {
            return None;
        }
        self.0
            .iter()
            .position(|h| *h == wanted)
            .or_else(|| self.0.iter().position(|h| h.contains(&wanted)))
            .map(|idx| idx + 1)
    }
}

fn fence_marker(line: &str) -> Option<char> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") {
        Some('`')
    } else if trimmed.starts_with("~~~") {
        Some('~')
    } else {
        None
    }
}

/// Replace `[[ref:Heading]]` with `Section N`; unresolvable targets become plain text.
fn resolve_refs(line: &str, index: &SectionIndex, unresolved: &mut Vec<String>) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find(REF_OPEN) {
        let after = &rest[start + REF_OPEN.len()..];
        let Some(end) = after.find(REF_CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        let target = after[..end].trim();
        match index.resolve(target) {
            Some(number) => out.push_str(&format!("Section {}", number)),
            None => {
                out.push_str(target);
                unresolved.push(target.to_string());
            }
        }
        rest = &after[end + REF_CLOSE.len()..];
    }
    out.push_str(rest);
    out
}

/// Demote body headings under an H2 section without level jumps, and resolve references.
fn normalize_body(body: &str, index: &SectionIndex, unresolved: &mut Vec<String>) -> String {
    let mut in_fence: Option<char> = None;
    let mut min_level: Option<usize> = None;
    for line in body.lines() {
        if let Some(marker) = fence_marker(line) {
            in_fence = match in_fence {
                Some(open) if open == marker => None,
                None => Some(marker),
                other => other,
            };
            continue;
        }
        if in_fence.is_none() {
            if let Some((level, _)) = parse_heading(line) {
                let level = level as usize;
                min_level = Some(min_level.map_or(level, |m| m.min(level)));
            }
        }
    }

    let mut lines = Vec::new();
    let mut in_fence: Option<char> = None;
    let mut previous = BODY_HEADING_BASE - 1;
    for line in body.lines() {
        if let Some(marker) = fence_marker(line) {
            in_fence = match in_fence {
                Some(open) if open == marker => None,
                None => Some(marker),
                other => other,
            };
            lines.push(line.to_string());
            continue;
        }
        if in_fence.is_some() {
            lines.push(line.to_string());
            continue;
        }
        match parse_heading(line) {
            Some((level, text)) => {
                let relative = level as usize - min_level.unwrap_or(level as usize);
                let target = (BODY_HEADING_BASE + relative).min(previous + 1).min(6);
                previous = target;
                let text = resolve_refs(&text, index, unresolved);
                lines.push(format!("{} {}", "#".repeat(target), text));
            }
            None => lines.push(resolve_refs(line, index, unresolved)),
        }
    }
    lines.join("\n").trim().to_string()
}

impl Assembler {
    pub fn assemble(
        title: &str,
        sections: &[ExpandedSection],
        context: Option<&ContextBundle>,
    ) -> AssembledDocument {
        let index = SectionIndex(sections.iter().map(|s| normalize_heading(&s.heading)).collect());
        let mut unresolved = Vec::new();
        let mut markdown = format!("# {}\n", title.trim());

        for (i, section) in sections.iter().enumerate() {
            let body = normalize_body(&section.body, &index, &mut unresolved);
            markdown.push_str(&format!("\n## {}. {}\n\n{}\n", i + 1, section.heading.trim(), body));
        }

        let citations: Vec<Citation> = context
            .map(|bundle| {
                bundle
                    .chunks
                    .iter()
                    .filter(|c| markdown.contains(&c.citation.marker))
                    .map(|c| c.citation.clone())
                    .collect()
            })
            .unwrap_or_default();
        if !citations.is_empty() {
            markdown.push_str("\n## References\n\n");
            for citation in &citations {
                markdown.push_str(&format!("- {} {}\n", citation.marker, citation.source));
            }
        }

        AssembledDocument {
            title: title.trim().to_string(),
            markdown,
            citations,
            unresolved_refs: unresolved,
        }
    }
}

#[async_trait]
impl Stage for Assembler {
    fn kind(&self) -> StageKind {
        StageKind::Assembler
    }

    async fn execute(
        &self,
        state: &GenerationState,
        _meter: &mut UsageMeter,
    ) -> Result<StateDelta, StageError> {
        let outline = state
            .outline
            .as_ref()
            .ok_or_else(|| StageError::terminal(StageKind::Assembler, "no outline"))?;
        let sections = state
            .sections
            .as_ref()
            .ok_or_else(|| StageError::terminal(StageKind::Assembler, "no expanded sections"))?;
        let assembled = Self::assemble(&outline.title, sections, state.context.as_deref());
        let errors: Vec<String> = assembled
            .unresolved_refs
            .iter()
            .map(|target| format!("assembler: unresolved cross-reference '{}'", target))
            .collect();
        let mut delta = StateDelta::assembled(assembled);
        delta.errors = errors;
        Ok(delta)
    }
}
