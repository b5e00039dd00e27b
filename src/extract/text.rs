//! Pure text heuristics over ordered line/sentence spans.
//!
//! None of these functions allocate more than the output they return and none
//! of them fail: garbage in, best-effort text out.

use std::collections::HashSet;

/// Labels longer than this are treated as prose, not as a `Label:` prefix.
pub const MAX_LABEL_CHARS: usize = 40;

const COLONS: [char; 2] = [':', '：'];
const SENTENCE_ENDS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

/// Strip any run of list enumerators (`1.`, `2)`, `3、`, `-`, `*`, `•`, `#`)
/// from the start of `line`.
///
/// A numeric enumerator directly followed by another digit (`1.5`) is kept.
pub fn strip_enumeration(line: &str) -> &str {
    let mut rest = line.trim_start();
    loop {
        let next = strip_one_enumerator(rest).trim_start();
        if next.len() == rest.len() {
            return rest;
        }
        rest = next;
    }
}

fn strip_one_enumerator(s: &str) -> &str {
    for bullet in ['-', '*', '•', '#'] {
        if let Some(after) = s.strip_prefix(bullet) {
            let after = after.trim_start_matches(bullet);
            if after.starts_with(char::is_whitespace) {
                return after;
            }
        }
    }

    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || digits > 3 {
        return s;
    }
    let rest = &s[digits..];
    for sep in ['.', ')', '、'] {
        if let Some(after) = rest.strip_prefix(sep) {
            if !after.starts_with(|c: char| c.is_ascii_digit()) {
                return after;
            }
        }
    }
    s
}

/// Drop a leading `Label:` (ASCII or full-width colon) and keep the trailing
/// text. Colons later in the value are left alone.
///
/// A blank label loses just its colon. Labels over [`MAX_LABEL_CHARS`], URL
/// schemes (`http://`) and times or ratios split at the first colon (`10:30`)
/// are not labels.
pub fn strip_label(line: &str) -> &str {
    let Some(idx) = line.find(COLONS) else {
        return line;
    };
    let (label, rest) = line.split_at(idx);
    let sep_len = rest.chars().next().map(char::len_utf8).unwrap_or(0);
    let value = &rest[sep_len..];

    let numeric_pair = label.ends_with(|c: char| c.is_ascii_digit()) && value.starts_with(|c: char| c.is_ascii_digit());
    if label.chars().count() > MAX_LABEL_CHARS || value.starts_with("//") || numeric_pair {
        return line;
    }
    value.trim()
}

/// Greedily merge adjacent short lines into paragraphs.
///
/// A line joins the current paragraph (separated by a single space) while the
/// combined character count stays under `threshold`. Blank lines are skipped.
pub fn merge_short_lines<S: AsRef<str>>(lines: &[S], threshold: usize) -> Vec<String> {
    let mut merged = Vec::new();
    let mut current = String::new();

    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        if current.chars().count() + line.chars().count() < threshold {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(line);
        } else {
            if !current.is_empty() {
                merged.push(std::mem::take(&mut current));
            }
            current = line.to_string();
        }
    }
    if !current.is_empty() {
        merged.push(current);
    }
    merged
}

/// Join the non-blank lines of `text` with single spaces.
pub fn flatten_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop lines that open with a model's meta commentary (`This translation…`).
pub fn remove_commentary_lines(text: &str, prefixes: &[&str]) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !prefixes.iter().any(|p| trimmed.starts_with(p))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split a line into sentences, each keeping its terminator.
pub fn split_sentences(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = line.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if !SENTENCE_ENDS.contains(&c) {
            continue;
        }
        // keep runs like "?!" or "..." together
        let mut end = idx + c.len_utf8();
        while let Some(&(next_idx, next)) = chars.peek() {
            if SENTENCE_ENDS.contains(&next) {
                end = next_idx + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        // an ASCII period inside a token (3.5, e.g) is not a boundary
        if c == '.' && chars.peek().is_some_and(|&(_, n)| !n.is_whitespace()) {
            continue;
        }
        let sentence = line[start..end].trim();
        if !sentence.is_empty() {
            out.push(sentence);
        }
        start = end;
    }

    let tail = line[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Keep the first occurrence of every span, preserving order.
pub fn dedupe_spans<S: AsRef<str>>(spans: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    spans
        .iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty() && seen.insert(s.to_string()))
        .map(str::to_string)
        .collect()
}

/// Remove sentences that already appeared earlier in `text`.
///
/// Line structure is kept; lines whose sentences were all duplicates vanish.
pub fn dedupe_sentences(text: &str) -> String {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            lines.push(String::new());
            continue;
        }
        let kept: Vec<&str> = split_sentences(line)
            .into_iter()
            .filter(|s| seen.insert(s.to_string()))
            .collect();
        if kept.is_empty() {
            continue;
        }
        lines.push(join_sentences(&kept));
    }

    let joined = lines.join("\n");
    joined.trim_matches('\n').to_string()
}

fn join_sentences(sentences: &[&str]) -> String {
    let mut out = String::new();
    for sentence in sentences {
        if let Some(last) = out.chars().last() {
            if last.is_ascii() {
                out.push(' ');
            }
        }
        out.push_str(sentence);
    }
    out
}

/// Number the first `limit` non-blank lines as `1. …`, `2. …`.
pub fn number_lines(text: &str, limit: usize) -> String {
    text.lines()
        .map(|l| strip_enumeration(l.trim()))
        .filter(|l| !l.is_empty())
        .take(limit)
        .enumerate()
        .map(|(i, l)| format!("{}. {}", i + 1, l))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumeration_is_stripped_repeatedly() {
        assert_eq!(strip_enumeration("1. 2) foo"), "foo");
        assert_eq!(strip_enumeration("  - item"), "item");
        assert_eq!(strip_enumeration("## Heading"), "Heading");
        assert_eq!(strip_enumeration("3、中文条目"), "中文条目");
    }

    #[test]
    fn decimals_and_bold_are_not_enumerators() {
        assert_eq!(strip_enumeration("1.5 GHz"), "1.5 GHz");
        assert_eq!(strip_enumeration("**bold**"), "**bold**");
        assert_eq!(strip_enumeration("2024 was long"), "2024 was long");
    }

    #[test]
    fn leading_label_is_dropped() {
        assert_eq!(strip_label("Label: hello world"), "hello world");
        assert_eq!(strip_label("角色：一位画家"), "一位画家");
        assert_eq!(strip_label("Label:"), "");
        assert_eq!(strip_label(": dangling"), "dangling");
    }

    #[test]
    fn value_keeps_its_own_colons() {
        assert_eq!(strip_label("Aspect: ratio 16:9 portrait"), "ratio 16:9 portrait");
        assert_eq!(strip_label("Time: 10:30"), "10:30");
    }

    #[test]
    fn label_stripping_leaves_non_labels_alone() {
        assert_eq!(strip_label("at 10:30: meet"), "at 10:30: meet");
        assert_eq!(strip_label("ratio 16:9"), "ratio 16:9");
        assert_eq!(strip_label("see http://example.com"), "see http://example.com");
        let long = format!("{}: tail", "x".repeat(MAX_LABEL_CHARS + 1));
        assert_eq!(strip_label(&long), long);
    }

    #[test]
    fn short_lines_merge_until_threshold() {
        let lines = ["aaaa", "bbbb", "cccc"];
        assert_eq!(merge_short_lines(&lines, 10), vec!["aaaa bbbb", "cccc"]);
        assert_eq!(merge_short_lines(&lines, 100), vec!["aaaa bbbb cccc"]);
    }

    #[test]
    fn long_lines_stay_alone() {
        let long = "x".repeat(120);
        let lines = [long.as_str(), "short"];
        assert_eq!(merge_short_lines(&lines, 100), vec![long.clone(), "short".to_string()]);
    }

    #[test]
    fn merging_counts_chars_not_bytes() {
        // 4 CJK chars are 12 bytes
        let lines = ["一二三四", "五六七八"];
        assert_eq!(merge_short_lines(&lines, 9), vec!["一二三四 五六七八"]);
    }

    #[test]
    fn merging_is_idempotent() {
        let lines = ["one two", "three", "a much longer line that will not fit with the others", "x"];
        let once = merge_short_lines(&lines, 30);
        let twice = merge_short_lines(&once, 30);
        assert_eq!(once, twice);
    }

    #[test]
    fn commentary_lines_are_removed() {
        let text = "Bonjour le monde\nThis translation keeps the tone.\n这个翻译很好\nSalut";
        assert_eq!(
            remove_commentary_lines(text, &["这个", "This"]),
            "Bonjour le monde\nSalut"
        );
    }

    #[test]
    fn sentences_split_on_latin_and_cjk_terminators() {
        assert_eq!(
            split_sentences("Hi there. How are you?! 你好。好的"),
            vec!["Hi there.", "How are you?!", "你好。", "好的"]
        );
        assert_eq!(split_sentences("Version 3.5 is out."), vec!["Version 3.5 is out."]);
    }

    #[test]
    fn duplicate_sentences_are_dropped_in_order() {
        let text = "A cat sat. A cat sat. The end.\nA cat sat.\n猫坐着。猫坐着。";
        assert_eq!(dedupe_sentences(text), "A cat sat. The end.\n猫坐着。");
    }

    #[test]
    fn spans_dedupe_keeps_first() {
        assert_eq!(dedupe_spans(&["a", " b", "a", "", "b"]), vec!["a", "b"]);
    }

    #[test]
    fn lines_are_numbered() {
        assert_eq!(number_lines("first\n\n- second\nthird", 2), "1. first\n2. second");
    }

    #[test]
    fn flatten_joins_non_blank_lines() {
        assert_eq!(flatten_lines(" a \n\n b\n"), "a b");
    }
}
