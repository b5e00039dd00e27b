//! Tag-pair extraction: `<tag> … </tag>` blocks and their cleanup.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::warn;

use super::text::{merge_short_lines, strip_enumeration, strip_label};

static INLINE_TAG: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"</?[A-Za-z][A-Za-z0-9_\-]*\s*/?>").ok());

/// Compile the non-greedy, case-insensitive, dot-matches-newline pattern for
/// one tag name.
pub(crate) fn tag_pattern(tag: &str) -> Option<Regex> {
    let escaped = regex::escape(tag.trim());
    let pattern = format!(r"<{escaped}\s*>(.*?)</{escaped}\s*>");
    match RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(tag, error = %e, "tag pattern rejected; field will stay empty");
            None
        }
    }
}

/// Whether the opening tag appears anywhere in `text`.
pub(crate) fn has_open_tag(text: &str, tag: &str) -> bool {
    let open = format!("<{}", tag.trim()).to_lowercase();
    text.to_lowercase().contains(&open)
}

/// Content of the first complete pair, untrimmed. `None` without a closing tag.
pub(crate) fn first_block<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Remove inline tags until none are left.
pub fn strip_inline_tags(line: &str) -> String {
    let Some(re) = INLINE_TAG.as_ref() else {
        return line.to_string();
    };
    let mut current = line.to_string();
    loop {
        let next = re.replace_all(&current, "").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Normalise enumerated, labelled tag content into paragraphs.
///
/// Each line loses inline tags, quote markers, enumerators and a leading
/// `Label:`; the survivors are merged into paragraphs shorter than
/// `merge_threshold` characters and joined with a blank line.
pub fn clean_tagged_block(content: &str, merge_threshold: usize) -> String {
    let lines: Vec<String> = content.lines().filter_map(clean_line).collect();
    merge_short_lines(&lines, merge_threshold).join("\n\n")
}

fn clean_line(line: &str) -> Option<String> {
    let untagged = strip_inline_tags(line);
    let mut rest = untagged.trim();
    // Stripping a label can expose an enumerator and vice versa.
    loop {
        let next = strip_label(strip_enumeration(rest.trim_start_matches('>'))).trim();
        if next.len() == rest.len() {
            break;
        }
        rest = next;
    }
    (!rest.is_empty()).then(|| rest.to_string())
}
