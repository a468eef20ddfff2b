//! Memory marker grammar (spec.md §4.5.1, §6 "Memory markers", §9, P7).
//!
//! "An implementation should treat marker extraction as parsing a small
//! context-free grammar (single pair, no nesting), not as ad-hoc
//! substring replacement. Reject nested or unbalanced markers." This
//! module is that grammar: find the *last* matched `<START>...<END>` pair
//! in the agent's result text, reject the text as malformed if the
//! markers are unbalanced or nested, and truncate the extracted body to a
//! byte cap on a UTF-8 character boundary.

pub const START_MARKER: &str = "<START>";
pub const END_MARKER: &str = "<END>";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkerError {
    #[error("end marker found before any start marker")]
    EndBeforeStart,
    #[error("start marker with no matching end marker")]
    UnterminatedStart,
    #[error("nested start marker before a matching end marker")]
    NestedStart,
}

/// Extract the memory body between the most recent matched marker pair.
///
/// Returns `Ok(None)` when no markers are present at all (nothing to
/// apply — spec.md §4.5.1 "if both are found"). Returns `Err` when the
/// markers are malformed; callers must not mutate the memory ConfigMap in
/// that case and should log a warning instead (spec.md §4.5.1).
pub fn extract_body(result_text: &str) -> Result<Option<&str>, MarkerError> {
    let mut last_pair: Option<(usize, usize)> = None;
    let mut cursor = 0usize;
    let mut open_start: Option<usize> = None;

    loop {
        let next_start = result_text[cursor..].find(START_MARKER);
        let next_end = result_text[cursor..].find(END_MARKER);

        match (next_start, next_end) {
            (None, None) => break,
            (None, Some(end_rel)) => {
                let end_pos = cursor + end_rel;
                match open_start.take() {
                    Some(start_pos) => {
                        last_pair = Some((start_pos, end_pos));
                        cursor = end_pos + END_MARKER.len();
                    }
                    None => return Err(MarkerError::EndBeforeStart),
                }
            }
            (Some(start_rel), None) => {
                let start_pos = cursor + start_rel;
                if open_start.is_some() {
                    return Err(MarkerError::NestedStart);
                }
                open_start = Some(start_pos);
                cursor = start_pos + START_MARKER.len();
            }
            (Some(start_rel), Some(end_rel)) => {
                if start_rel < end_rel {
                    let start_pos = cursor + start_rel;
                    if open_start.is_some() {
                        return Err(MarkerError::NestedStart);
                    }
                    open_start = Some(start_pos);
                    cursor = start_pos + START_MARKER.len();
                } else {
                    let end_pos = cursor + end_rel;
                    match open_start.take() {
                        Some(start_pos) => {
                            last_pair = Some((start_pos, end_pos));
                            cursor = end_pos + END_MARKER.len();
                        }
                        None => return Err(MarkerError::EndBeforeStart),
                    }
                }
            }
        }
    }

    if open_start.is_some() {
        return Err(MarkerError::UnterminatedStart);
    }

    Ok(last_pair.map(|(start, end)| {
        let body_start = start + START_MARKER.len();
        // Strip exactly the one newline separating `<START>` from the body;
        // a trailing newline before `<END>` is part of the body (P7: `"pre\n<START>\nBODY\n<END>\npost"`
        // must extract to `"BODY\n"`, not `"BODY"`).
        result_text[body_start..end]
            .strip_prefix('\n')
            .unwrap_or(&result_text[body_start..end])
    }))
}

/// Truncate `body` to at most `cap_bytes` bytes without splitting a UTF-8
/// codepoint (spec.md §8 scenario 6, P7).
pub fn truncate_on_boundary(body: &str, cap_bytes: usize) -> &str {
    if body.len() <= cap_bytes {
        return body;
    }
    let mut end = cap_bytes;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_markers_returns_none() {
        assert_eq!(extract_body("just some text").unwrap(), None);
    }

    #[test]
    fn simple_pair_extracts_body() {
        let text = "pre\n<START>\nBODY\n<END>\npost";
        assert_eq!(extract_body(text).unwrap(), Some("BODY\n"));
    }

    #[test]
    fn end_before_start_is_malformed() {
        let text = "<END>stuff<START>";
        assert_eq!(extract_body(text), Err(MarkerError::EndBeforeStart));
    }

    #[test]
    fn unterminated_start_is_malformed() {
        let text = "pre <START> body with no end";
        assert_eq!(extract_body(text), Err(MarkerError::UnterminatedStart));
    }

    #[test]
    fn nested_start_is_malformed() {
        let text = "<START> outer <START> inner <END>";
        assert_eq!(extract_body(text), Err(MarkerError::NestedStart));
    }

    #[test]
    fn only_the_most_recent_pair_is_applied() {
        let text = "<START>old<END> middle <START>new<END>";
        assert_eq!(extract_body(text).unwrap(), Some("new"));
    }

    #[test]
    fn truncation_never_splits_a_codepoint() {
        // 'é' is 2 bytes in UTF-8; cap lands mid-codepoint at byte 1.
        let body = "a\u{e9}"; // "a" + "é"
        let truncated = truncate_on_boundary(body, 1);
        assert!(truncated.is_char_boundary(truncated.len()));
        assert_eq!(truncated, "a");
    }

    #[test]
    fn truncation_below_cap_is_unchanged() {
        assert_eq!(truncate_on_boundary("short", 1024), "short");
    }

    #[test]
    fn p7_scenario_exact_text() {
        let text = "pre\n<START>\nBODY\n<END>\npost";
        let body = extract_body(text).unwrap().unwrap();
        assert_eq!(body, "BODY\n");
    }
}
