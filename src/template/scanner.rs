use super::TypeTag;
use super::parsers::{
    is_block_comment_end, is_block_comment_start, is_line_comment_start,
    matches_tag, scan_identifier, scan_type_tag, try_start_dollar_quote,
};

#[derive(Clone)]
pub(super) enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token<'a> {
    Text(&'a str),
    Named {
        name: &'a str,
        tag: Option<TypeTag>,
    },
    Positional {
        tag: Option<TypeTag>,
    },
    Open {
        offset: usize,
    },
    Close {
        offset: usize,
    },
}

/// Lexical failure with the byte offset it was detected at.
#[derive(Debug)]
pub(super) struct ScanError {
    pub(super) offset: usize,
    pub(super) message: String,
}

/// Split template text into literal spans, placeholders, and block delimiters.
///
/// Quoted strings, quoted identifiers, comments, and dollar-quoted bodies are
/// scanned as literal text so placeholder syntax inside them is left alone.
pub(super) fn tokenize(sql: &str) -> Result<Vec<Token<'_>>, ScanError> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut state = State::Normal;
    let mut span_start = 0;
    let mut idx = 0;

    // Flush the pending literal span, emit `token`, and resume scanning at `resume`.
    macro_rules! emit {
        ($token:expr, $resume:expr) => {{
            if span_start < idx {
                tokens.push(Token::Text(&sql[span_start..idx]));
            }
            tokens.push($token);
            idx = $resume;
            span_start = idx;
            continue;
        }};
    }

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                _ if is_line_comment_start(bytes, idx) => state = State::LineComment,
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                // `\{` and `\}` are literal braces; a doubled brace is always two delimiters
                b'\\' if matches!(bytes.get(idx + 1), Some(b'{' | b'}')) => {
                    emit!(Token::Text(&sql[idx + 1..idx + 2]), idx + 2)
                }
                b'{' => emit!(Token::Open { offset: idx }, idx + 1),
                b'}' => emit!(Token::Close { offset: idx }, idx + 1),
                b'?' => match bytes.get(idx + 1) {
                    Some(b'?') => emit!(Token::Text(&sql[idx..=idx]), idx + 2),
                    Some(b'|' | b'&') => idx += 1,
                    _ => {
                        let (tag, resume) = tag_after(bytes, idx + 1)?;
                        emit!(Token::Positional { tag }, resume)
                    }
                },
                b':' => {
                    if bytes.get(idx + 1) == Some(&b':') {
                        idx += 1;
                    } else if let Some(end) = scan_identifier(bytes, idx + 1) {
                        let (tag, resume) = tag_after(bytes, end)?;
                        emit!(
                            Token::Named {
                                name: &sql[idx + 1..end],
                                tag,
                            },
                            resume
                        )
                    }
                }
                b'$' => {
                    if let Some((tag, advance)) = try_start_dollar_quote(bytes, idx) {
                        state = State::DollarQuoted(tag);
                        idx = advance;
                    } else if let Some(end) = scan_identifier(bytes, idx + 1) {
                        let (tag, resume) = tag_after(bytes, end)?;
                        emit!(
                            Token::Named {
                                name: &sql[idx + 1..end],
                                tag,
                            },
                            resume
                        )
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1; // skip escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1; // skip escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_block_comment_end(bytes, idx) {
                    idx += 1;
                    if depth == 1 {
                        state = State::Normal;
                    } else {
                        state = State::BlockComment(depth - 1);
                    }
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && matches_tag(bytes, idx, tag) {
                    idx += tag.len() + 1;
                    state = State::Normal;
                }
            }
        }

        idx += 1;
    }

    if span_start < bytes.len() {
        tokens.push(Token::Text(&sql[span_start..]));
    }

    Ok(tokens)
}

fn tag_after(bytes: &[u8], idx: usize) -> Result<(Option<TypeTag>, usize), ScanError> {
    match scan_type_tag(bytes, idx) {
        Ok(Some((tag, end))) => Ok((Some(tag), end)),
        Ok(None) => Ok((None, idx)),
        Err(message) => Err(ScanError {
            offset: idx,
            message,
        }),
    }
}
