//! Prompt framing helpers shared by drafting stages and judges.

/// Opening delimiter around an embedded document.
pub const DOCUMENT_OPEN: &str = "<<<DOCUMENT";
/// Closing delimiter around an embedded document.
pub const DOCUMENT_CLOSE: &str = "DOCUMENT>>>";

/// Wrap a document between the delimiters so models (and test doubles) can find it.
pub fn embed_document(markdown: &str) -> String {
    format!("{}\n{}\n{}", DOCUMENT_OPEN, markdown.trim_end(), DOCUMENT_CLOSE)
}

/// Text between the document delimiters, if present.
pub fn embedded_document(prompt: &str) -> Option<&str> {
    let start = prompt.find(DOCUMENT_OPEN)? + DOCUMENT_OPEN.len();
    let end = prompt[start..].find(DOCUMENT_CLOSE)? + start;
    Some(prompt[start..end].trim_matches('\n'))
}

/// Value of a `KEY: value` header line in a prompt.
pub fn header_value<'a>(prompt: &'a str, key: &str) -> Option<&'a str> {
    prompt.lines().find_map(|line| {
        line.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(str::trim)
    })
}

/// The outermost JSON object in a reply, tolerating prose or fences around it.
pub fn extract_json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

/// Drop a single markdown fence wrapping the whole reply.
pub fn strip_outer_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let Some(first_newline) = trimmed.find('\n') else {
        return trimmed;
    };
    let body = &trimmed[first_newline + 1..];
    match body.trim_end().strip_suffix("```") {
        Some(inner) => inner.trim_end(),
        None => trimmed,
    }
}

pub fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- (none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}
