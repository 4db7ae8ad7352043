//! Tagged-block response parser.
//!
//! Grammar for each block: `OPEN body CLOSE`, where `body` is the shortest
//! run of text up to the first `CLOSE` after `OPEN`. Parsing is pure and
//! total: any input, including the empty string, yields a value.

/// Final-answer block markers.
pub const PROMPT_OPEN: &str = "[PROMPT_START]";
pub const PROMPT_CLOSE: &str = "[PROMPT_END]";
/// Follow-up question block markers; the body is a JSON array of strings.
pub const QUESTIONS_OPEN: &str = "[QUESTIONS_START]";
pub const QUESTIONS_CLOSE: &str = "[QUESTIONS_END]";
/// Strategy label block markers.
pub const STRATEGY_OPEN: &str = "[FRAMEWORK]";
pub const STRATEGY_CLOSE: &str = "[/FRAMEWORK]";

const ALL_MARKERS: [&str; 6] = [
    PROMPT_OPEN,
    PROMPT_CLOSE,
    QUESTIONS_OPEN,
    QUESTIONS_CLOSE,
    STRATEGY_OPEN,
    STRATEGY_CLOSE,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub optimized_text: String,
    pub questions: Vec<String>,
    pub strategy_label: Option<String>,
}

/// Byte span of one matched block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockSpan {
    /// Start of the open marker.
    start: usize,
    body_start: usize,
    body_end: usize,
    /// End of the close marker.
    end: usize,
}

fn find_block(text: &str, open: &str, close: &str, from: usize) -> Option<BlockSpan> {
    let start = from + text.get(from..)?.find(open)?;
    let body_start = start + open.len();
    let body_end = body_start + text[body_start..].find(close)?;
    Some(BlockSpan {
        start,
        body_start,
        body_end,
        end: body_end + close.len(),
    })
}

fn block_body<'t>(text: &'t str, open: &str, close: &str) -> Option<&'t str> {
    find_block(text, open, close, 0).map(|span| &text[span.body_start..span.body_end])
}

/// Drop every complete `open..close` block from `text`.
fn remove_blocks(text: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(span) = find_block(text, open, close, cursor) {
        out.push_str(&text[cursor..span.start]);
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Strip markdown code fences the model sometimes wraps JSON in.
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let clean = clean.strip_suffix("```").unwrap_or(clean);
    clean.trim()
}

fn parse_questions(body: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(strip_markdown_fences(body)) {
        Ok(questions) => questions
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect(),
        Err(err) => {
            tracing::debug!("question block is not a JSON string array: {}", err);
            Vec::new()
        }
    }
}

/// Best-effort cleanup when no final-answer block exists. Only the question
/// block is dropped; every other marker is stripped until none remain, since
/// one removal can splice a new marker together.
fn fallback_text(raw: &str) -> String {
    let mut text = remove_blocks(raw, QUESTIONS_OPEN, QUESTIONS_CLOSE);
    loop {
        let stripped = ALL_MARKERS
            .iter()
            .fold(text.clone(), |acc, marker| acc.replace(marker, ""));
        if stripped == text {
            break;
        }
        text = stripped;
    }
    text.trim().to_string()
}

/// Split a raw model reply into prompt text, follow-up questions, and the
/// reported strategy label.
pub fn parse_response(raw: &str) -> ParsedResponse {
    let optimized_text = match block_body(raw, PROMPT_OPEN, PROMPT_CLOSE) {
        Some(body) => body.trim().to_string(),
        None => {
            tracing::debug!("no final-answer block in response, using fallback text");
            fallback_text(raw)
        }
    };

    let questions = block_body(raw, QUESTIONS_OPEN, QUESTIONS_CLOSE)
        .map(parse_questions)
        .unwrap_or_default();

    let strategy_label = block_body(raw, STRATEGY_OPEN, STRATEGY_CLOSE)
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string);

    ParsedResponse {
        optimized_text,
        questions,
        strategy_label,
    }
}
