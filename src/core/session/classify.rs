// src/core/session/classify.rs

//! Decides whether an operation writes.

/// Clause keywords that make an operation a write.
const WRITE_KEYWORDS: &[&str] = &["CREATE", "MERGE", "DELETE", "DETACH", "SET", "REMOVE", "DROP"];

/// Returns true if `operation` contains a write keyword as a whole word,
/// ignoring case and anything inside a quoted literal.
pub fn is_write(operation: &str) -> bool {
    words(operation).any(|word| {
        WRITE_KEYWORDS
            .iter()
            .any(|keyword| word.eq_ignore_ascii_case(keyword))
    })
}

/// Yields the identifier-like words of `input` that sit outside quotes.
fn words(input: &str) -> impl Iterator<Item = &str> {
    let mut out = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start: Option<usize> = None;

    for (i, c) in input.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        if c.is_alphanumeric() || c == '_' {
            start.get_or_insert(i);
            continue;
        }

        if let Some(s) = start.take() {
            out.push(&input[s..i]);
        }
        if matches!(c, '\'' | '"' | '`') {
            quote = Some(c);
        }
    }
    if let (Some(s), None) = (start, quote) {
        out.push(&input[s..]);
    }
    out.into_iter()
}
