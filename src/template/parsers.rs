use super::TypeTag;

pub(super) fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

pub(super) fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

pub(super) fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

/// Recognize the opening `$tag$` of a dollar-quoted body; returns the tag and
/// the index of its closing `$`.
///
/// Tags follow identifier rules, so `$1$` stays a numbered marker and a literal `$`.
pub(super) fn try_start_dollar_quote(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let close = match bytes.get(start + 1) {
        Some(b'$') => start + 1,
        _ => scan_identifier(bytes, start + 1)?,
    };
    if bytes.get(close) != Some(&b'$') {
        return None;
    }
    let tag = std::str::from_utf8(&bytes[start + 1..close]).ok()?;
    Some((tag.to_string(), close))
}

pub(super) fn matches_tag(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let end = idx + 1 + tag.len();
    end < bytes.len()
        && bytes[idx + 1..end] == *tag.as_bytes()
        && bytes.get(end) == Some(&b'$')
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// End index (exclusive) of the identifier starting at `start`, if one starts there.
pub(super) fn scan_identifier(bytes: &[u8], start: usize) -> Option<usize> {
    if !bytes.get(start).copied().is_some_and(is_ident_start) {
        return None;
    }
    let mut idx = start + 1;
    while idx < bytes.len() && is_ident_char(bytes[idx]) {
        idx += 1;
    }
    Some(idx)
}

/// Parse an optional `!x` type tag at `idx`.
///
/// `Ok(None)` means no tag starts here (`!=` and friends stay literal SQL).
pub(super) fn scan_type_tag(bytes: &[u8], idx: usize) -> Result<Option<(TypeTag, usize)>, String> {
    if bytes.get(idx) != Some(&b'!') {
        return Ok(None);
    }
    if !bytes.get(idx + 1).is_some_and(u8::is_ascii_alphabetic) {
        return Ok(None);
    }
    let mut end = idx + 1;
    while end < bytes.len() && is_ident_char(bytes[end]) {
        end += 1;
    }
    let run = &bytes[idx + 1..end];
    match run {
        [letter] => TypeTag::from_letter(char::from(*letter))
            .map(|tag| Some((tag, end)))
            .ok_or_else(|| format!("unknown type tag '!{}'", char::from(*letter))),
        _ => Err(format!(
            "unknown type tag '!{}'",
            String::from_utf8_lossy(run)
        )),
    }
}
