//! Inline citation extraction.
//!
//! Generated answers embed machine-written markers of the form
//! `[cite:<document-id>:<chunk-index>]`. This module parses them out,
//! strips them for display, and groups them into per-document source
//! lists. Everything here is pure string work: no I/O, no errors,
//! malformed input degrades to empty results.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

/// Marker introducer between the opening bracket and the document id
const MARKER_PREFIX: &str = "[cite:";

/// One inline citation marker found in generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineCitation {
    pub document_id: String,
    pub chunk_index: u32,
    /// Byte range of the full marker span in the source text
    pub span: Range<usize>,
}

/// A cited document with its deduplicated, ascending chunk set.
/// Derived on demand from a marker list; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSource {
    pub document_id: String,
    pub display_title: String,
    pub chunk_indexes: Vec<u32>,
}

/// Scan `text` left to right for every well-formed citation marker.
///
/// Results are in order of appearance; a document may appear any
/// number of times. Malformed or overlapping bracket spans are not
/// matched. An explicit scanner is used rather than a regex so
/// pathological input cannot trigger backtracking blowups.
pub fn parse_inline_citations(text: &str) -> Vec<InlineCitation> {
    let bytes = text.as_bytes();
    let mut citations = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'[' {
            pos += 1;
            continue;
        }
        match match_marker(text, pos) {
            Some(citation) => {
                pos = citation.span.end;
                citations.push(citation);
            }
            None => pos += 1,
        }
    }

    citations
}

/// Try to match a single marker starting at byte offset `start`
/// (which must point at `[`).
fn match_marker(text: &str, start: usize) -> Option<InlineCitation> {
    let rest = &text[start..];
    let body = rest.strip_prefix(MARKER_PREFIX)?;

    // Document id token: everything up to the separating colon. Must
    // be non-empty and must not cross into another bracket span or
    // whitespace.
    let colon = body.find(':')?;
    let document_id = &body[..colon];
    if document_id.is_empty()
        || document_id
            .chars()
            .any(|c| c.is_whitespace() || c == '[' || c == ']')
    {
        return None;
    }

    // Chunk index token: decimal digits up to the closing bracket.
    let tail = &body[colon + 1..];
    let close = tail.find(']')?;
    let digits = &tail[..close];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let chunk_index = digits.parse().ok()?;

    let end = start + MARKER_PREFIX.len() + colon + 1 + close + 1;
    Some(InlineCitation {
        document_id: document_id.to_string(),
        chunk_index,
        span: start..end,
    })
}

/// Return `text` with every citation marker deleted.
///
/// The whitespace seam each deletion leaves is collapsed so no doubled
/// spaces remain; nothing else is altered, and text without markers is
/// returned unchanged. Idempotent.
pub fn remove_inline_citations(text: &str) -> String {
    let citations = parse_inline_citations(text);
    if citations.is_empty() {
        return text.to_string();
    }

    let mut cleaned = String::with_capacity(text.len());
    let mut pos = 0;

    for citation in &citations {
        cleaned.push_str(&text[pos..citation.span.start]);
        pos = citation.span.end;

        // Collapse the seam: if the deletion would leave a space
        // abutting existing leading/trailing whitespace, eat it.
        let ends_in_space = cleaned
            .chars()
            .last()
            .map_or(true, |c| c.is_whitespace());
        while ends_in_space && text[pos..].starts_with(' ') {
            pos += 1;
        }
    }
    cleaned.push_str(&text[pos..]);

    cleaned
}

/// Group citations by document, preserving first-seen document order.
///
/// Chunk indexes are deduplicated and sorted ascending. The display
/// title is a placeholder derived from the identifier; richer titles
/// come from the document store, not from here.
pub fn group_citations_by_document(citations: &[InlineCitation]) -> Vec<DocumentSource> {
    let mut order: Vec<&str> = Vec::new();
    let mut chunks: HashMap<&str, BTreeSet<u32>> = HashMap::new();

    for citation in citations {
        let id = citation.document_id.as_str();
        if !chunks.contains_key(id) {
            order.push(id);
        }
        chunks.entry(id).or_default().insert(citation.chunk_index);
    }

    order
        .into_iter()
        .map(|id| DocumentSource {
            document_id: id.to_string(),
            display_title: placeholder_title(id),
            chunk_indexes: chunks
                .remove(id)
                .map(|set| set.into_iter().collect())
                .unwrap_or_default(),
        })
        .collect()
}

/// Readable stand-in title derived from a document identifier.
fn placeholder_title(document_id: &str) -> String {
    document_id.replace(['-', '_'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert!(parse_inline_citations("").is_empty());
        assert_eq!(remove_inline_citations(""), "");
        assert!(group_citations_by_document(&[]).is_empty());
    }

    #[test]
    fn test_parse_single_marker() {
        let text = "Revenue rose 12% [cite:q3-report:6] year over year.";
        let citations = parse_inline_citations(text);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].document_id, "q3-report");
        assert_eq!(citations[0].chunk_index, 6);
        assert_eq!(&text[citations[0].span.clone()], "[cite:q3-report:6]");
    }

    #[test]
    fn test_parse_preserves_appearance_order() {
        let text = "[cite:b:2] then [cite:a:1] then [cite:b:2]";
        let citations = parse_inline_citations(text);
        let ids: Vec<&str> = citations.iter().map(|c| c.document_id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "b"]);
    }

    #[test]
    fn test_malformed_markers_skipped() {
        for text in [
            "[cite:doc:]",        // missing chunk index
            "[cite::4]",          // missing document id
            "[cite:doc:4x]",      // non-numeric index
            "[cite:doc 1:4]",     // whitespace in id
            "[cite:doc:4",        // unterminated
            "plain [brackets] 4", // no introducer
        ] {
            assert!(
                parse_inline_citations(text).is_empty(),
                "{text:?} should not match"
            );
            assert_eq!(remove_inline_citations(text), text);
        }
    }

    #[test]
    fn test_nested_bracket_recovers_inner_marker() {
        // The outer span is malformed; the scanner resumes inside it
        let citations = parse_inline_citations("[cite:[cite:doc:4]]");
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].document_id, "doc");
    }

    #[test]
    fn test_remove_collapses_seam() {
        assert_eq!(
            remove_inline_citations("Revenue rose [cite:q3:1] sharply."),
            "Revenue rose sharply."
        );
        assert_eq!(remove_inline_citations("x[cite:d:1]y"), "xy");
        assert_eq!(remove_inline_citations("[cite:d:1] leading"), "leading");
        assert_eq!(
            remove_inline_citations("a [cite:d:1] [cite:d:2] b"),
            "a b"
        );
    }

    #[test]
    fn test_remove_leaves_unmarked_text_unchanged() {
        let text = "no markers  here, double  spaces preserved";
        assert_eq!(remove_inline_citations(text), text);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let text = "A [cite:d:1] b [cite:e:2][cite:e:3] c";
        let once = remove_inline_citations(text);
        let twice = remove_inline_citations(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_group_dedupes_and_sorts_chunks() {
        let text = "[cite:d:6] .. [cite:d:11] .. [cite:d:6]";
        let citations = parse_inline_citations(text);
        let sources = group_citations_by_document(&citations);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].document_id, "d");
        assert_eq!(sources[0].chunk_indexes, vec![6, 11]);
    }

    #[test]
    fn test_group_preserves_first_seen_document_order() {
        let text = "[cite:beta:1] [cite:alpha:2] [cite:beta:3]";
        let sources = group_citations_by_document(&parse_inline_citations(text));
        let ids: Vec<&str> = sources.iter().map(|s| s.document_id.as_str()).collect();
        assert_eq!(ids, ["beta", "alpha"]);
    }

    #[test]
    fn test_placeholder_title() {
        let sources =
            group_citations_by_document(&parse_inline_citations("[cite:employee_handbook:2]"));
        assert_eq!(sources[0].display_title, "employee handbook");
    }

    #[test]
    fn test_unicode_text_around_markers() {
        let text = "Résumé § summary [cite:café-menu:3] fin";
        let citations = parse_inline_citations(text);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].document_id, "café-menu");
        assert_eq!(
            remove_inline_citations(text),
            "Résumé § summary fin"
        );
    }
}
