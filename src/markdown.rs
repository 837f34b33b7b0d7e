//! Line-oriented markdown scanning shared by the assembler and the heuristic filter.
//!
//! Only the structure the pipeline cares about is recognised: ATX headings and fenced code
//! blocks. Everything outside a fence is prose.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: u8,
    pub text: String,
    /// 1-based line number.
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fence {
    pub open_line: usize,
    pub close_line: Option<usize>,
    pub language: Option<String>,
    pub blank_before: bool,
    pub blank_after: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MarkdownOutline {
    pub headings: Vec<Heading>,
    pub fences: Vec<Fence>,
    /// Non-code lines with their 1-based line numbers, heading lines included.
    pub prose_lines: Vec<(usize, String)>,
}

pub fn parse(markdown: &str) -> MarkdownOutline {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut outline = MarkdownOutline::default();
    let mut open: Option<(char, usize, Fence)> = None;

    for (idx, raw) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let is_blank = |i: usize| lines.get(i).map_or(true, |l| l.trim().is_empty());

        if let Some((marker, len, mut fence)) = open.take() {
            if closes_fence(raw, marker, len) {
                fence.close_line = Some(line_no);
                fence.blank_after = is_blank(idx + 1);
                outline.fences.push(fence);
            } else {
                open = Some((marker, len, fence));
            }
            continue;
        }

        if let Some((marker, len, info)) = opens_fence(raw) {
            let language = info.split_whitespace().next().map(str::to_string);
            let fence = Fence {
                open_line: line_no,
                close_line: None,
                language,
                blank_before: idx == 0 || is_blank(idx - 1),
                blank_after: true,
            };
            open = Some((marker, len, fence));
            continue;
        }

        if let Some((level, text)) = parse_heading(raw) {
            outline.headings.push(Heading {
                level,
                text,
                line: line_no,
            });
        }
        outline.prose_lines.push((line_no, raw.to_string()));
    }

    if let Some((_, _, fence)) = open {
        outline.fences.push(fence);
    }
    outline
}

fn leading_indent_ok(line: &str) -> Option<&str> {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    Some(trimmed)
}

fn opens_fence(line: &str) -> Option<(char, usize, String)> {
    let trimmed = leading_indent_ok(line)?;
    let marker = trimmed.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let len = trimmed.chars().take_while(|c| *c == marker).count();
    if len < 3 {
        return None;
    }
    let info = trimmed[len..].trim().to_string();
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some((marker, len, info))
}

fn closes_fence(line: &str, marker: char, open_len: usize) -> bool {
    let Some(trimmed) = leading_indent_ok(line) else {
        return false;
    };
    let len = trimmed.chars().take_while(|c| *c == marker).count();
    len >= open_len && trimmed[len..].trim().is_empty()
}

/// Parse an ATX heading line into (level, text).
pub fn parse_heading(line: &str) -> Option<(u8, String)> {
    let trimmed = leading_indent_ok(line)?;
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let text = rest.trim().trim_end_matches('#').trim().to_string();
    Some((level as u8, text))
}

/// Lowercased heading text without section numbering such as `2.` or `3.1`.
pub fn normalize_heading(text: &str) -> String {
    let trimmed = text.trim();
    let without_number = trimmed
        .split_once(' ')
        .filter(|(head, _)| {
            !head.is_empty() && head.chars().all(|c| c.is_ascii_digit() || c == '.')
        })
        .map(|(_, tail)| tail)
        .unwrap_or(trimmed);
    without_number.trim().to_lowercase()
}

/// Prose text with heading markers removed and code blocks excluded.
pub fn prose_text(markdown: &str) -> String {
    parse(markdown)
        .prose_lines
        .into_iter()
        .map(|(_, line)| match parse_heading(&line) {
            Some((_, text)) => text,
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_word(token: &str) -> bool {
    token.chars().any(char::is_alphanumeric)
}

/// Words of prose, excluding fenced code.
pub fn word_count(markdown: &str) -> usize {
    prose_text(markdown)
        .split_whitespace()
        .filter(|t| is_word(t))
        .count()
}

/// Flesch reading ease of plain prose; `None` when there is nothing to score.
pub fn flesch_reading_ease(text: &str) -> Option<f64> {
    let words: Vec<&str> = text
        .split_whitespace()
        .filter(|t| t.chars().any(char::is_alphabetic))
        .collect();
    if words.is_empty() {
        return None;
    }
    let sentences = text
        .split(['.', '!', '?'])
        .filter(|s| s.chars().any(char::is_alphabetic))
        .count()
        .max(1);
    let syllables: usize = words.iter().map(|w| count_syllables(w)).sum();
    let words_per_sentence = words.len() as f64 / sentences as f64;
    let syllables_per_word = syllables as f64 / words.len() as f64;
    Some(206.835 - 1.015 * words_per_sentence - 84.6 * syllables_per_word)
}

fn count_syllables(word: &str) -> usize {
    let letters: Vec<char> = word
        .chars()
        .filter(|c| c.is_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if letters.is_empty() {
        return 0;
    }
    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
    let mut count = 0;
    let mut prev_vowel = false;
    for &c in &letters {
        let vowel = is_vowel(c);
        if vowel && !prev_vowel {
            count += 1;
        }
        prev_vowel = vowel;
    }
    if count > 1 && letters.ends_with(&['e']) && !letters.ends_with(&['l', 'e']) {
        count -= 1;
    }
    count.max(1)
}
