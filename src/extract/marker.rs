//! Marker-delimited extraction: `Label:` style section headers.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use super::FieldSpec;

/// One located marker occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Hit {
    pub field: usize,
    pub start: usize,
    pub end: usize,
}

/// A single case-insensitive alternation over every field's markers.
///
/// Alternatives are ordered longest first so that `Negative Prompt:` wins over
/// the `Prompt:` hiding inside it.
#[derive(Debug, Clone)]
pub(crate) struct MarkerIndex {
    re: Regex,
    owners: Vec<usize>,
}

impl MarkerIndex {
    pub fn build(fields: &[FieldSpec]) -> Option<Self> {
        let mut markers: Vec<(usize, &str)> = fields
            .iter()
            .enumerate()
            .flat_map(|(i, f)| f.markers.iter().map(move |m| (i, m.as_str())))
            .filter(|(_, m)| !m.trim().is_empty())
            .collect();
        if markers.is_empty() {
            return None;
        }
        markers.sort_by(|a, b| b.1.chars().count().cmp(&a.1.chars().count()));

        let pattern = markers
            .iter()
            .map(|(_, m)| format!("({})", regex::escape(m)))
            .collect::<Vec<_>>()
            .join("|");

        match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(re) => Some(Self {
                re,
                owners: markers.iter().map(|(i, _)| *i).collect(),
            }),
            Err(e) => {
                warn!(error = %e, "marker pattern rejected; marker extraction disabled");
                None
            }
        }
    }

    /// All non-overlapping marker hits, left to right.
    pub fn hits(&self, text: &str) -> Vec<Hit> {
        self.re
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let alt = caps.iter().skip(1).position(|g| g.is_some())?;
                Some(Hit {
                    field: *self.owners.get(alt)?,
                    start: whole.start(),
                    end: whole.end(),
                })
            })
            .collect()
    }
}

/// Span of `field`: from just after its first marker to the start of the next
/// marker that belongs to a different field. Later occurrences of the field's
/// own markers are cut out of the span when they open a line; mid-line ones
/// stay as text.
pub(crate) fn field_span(text: &str, hits: &[Hit], field: usize) -> Option<String> {
    let first = hits.iter().position(|h| h.field == field)?;
    let opening = hits[first];

    let mut span = String::new();
    let mut cursor = opening.end;
    for hit in &hits[first + 1..] {
        if hit.field != field {
            span.push_str(&text[cursor..hit.start]);
            return Some(span);
        }
        if opens_line(text, hit.start) {
            span.push_str(&text[cursor..hit.start]);
            cursor = hit.end;
        }
    }
    span.push_str(&text[cursor..]);
    Some(span)
}

fn opens_line(text: &str, at: usize) -> bool {
    text[..at]
        .rsplit('\n')
        .next()
        .is_some_and(|before| before.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Vec<FieldSpec> {
        vec![
            FieldSpec::marked("positive", &["Prompt:"]),
            FieldSpec::marked("negative", &["Negative Prompt:"]),
        ]
    }

    #[test]
    fn longest_marker_wins_at_same_position() {
        let index = MarkerIndex::build(&specs()).unwrap();
        let hits = index.hits("Prompt: a cat\nNegative Prompt: blurry");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].field, 0);
        assert_eq!(hits[1].field, 1);
    }

    #[test]
    fn span_stops_at_other_field_only() {
        let index = MarkerIndex::build(&specs()).unwrap();
        let text = "Prompt: a cat\nNegative Prompt: blurry\nnegative prompt: ugly";
        let hits = index.hits(text);
        assert_eq!(field_span(text, &hits, 0).unwrap().trim(), "a cat");
        assert_eq!(field_span(text, &hits, 1).unwrap(), " blurry\n ugly");
    }

    #[test]
    fn own_marker_mid_line_stays_in_span() {
        let index = MarkerIndex::build(&specs()).unwrap();
        let text = "Prompt: write Prompt: as a heading\n  Prompt: second";
        let hits = index.hits(text);
        assert_eq!(hits.len(), 3);
        assert_eq!(field_span(text, &hits, 0).unwrap(), " write Prompt: as a heading\n   second");
    }

    #[test]
    fn absent_marker_has_no_span() {
        let index = MarkerIndex::build(&specs()).unwrap();
        let hits = index.hits("nothing here");
        assert!(field_span("nothing here", &hits, 0).is_none());
    }

    #[test]
    fn no_markers_means_no_index() {
        assert!(MarkerIndex::build(&[FieldSpec::tagged("output", "output")]).is_none());
    }
}
