//! PDF → markdown via `pdf-extract` plus layout heuristics.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ConvertError;

/// Short all-caps lines are treated as section headings.
const HEADING_MAX_CHARS: usize = 50;

static SPACE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

pub fn pdf_to_markdown(bytes: &[u8]) -> Result<String, ConvertError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ConvertError::conversion("pdf", e))?;
    Ok(layout_to_markdown(&text))
}

/// Applies the heading and whitespace heuristics to extracted PDF text.
pub fn layout_to_markdown(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\u{c}', "\n\n");
    let text = SPACE_RUN_RE.replace_all(&text, " ");

    let lines: Vec<String> = text
        .lines()
        .map(|line| {
            let line = line.trim();
            if looks_like_heading(line) {
                format!("## {}", line)
            } else {
                line.to_string()
            }
        })
        .collect();

    BLANK_RUN_RE
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

fn looks_like_heading(line: &str) -> bool {
    line.chars().count() < HEADING_MAX_CHARS
        && line.chars().any(char::is_alphabetic)
        && line.to_uppercase() == line
}
