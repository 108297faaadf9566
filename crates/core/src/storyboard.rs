//! Parsing of the storyboard document produced by the worker.
//!
//! The worker returns `{"shots": [{title, description, prompt, order?,
//! transition?}]}`. Entries without an order (or with order `0`) take
//! their 1-based position in the list.

use serde::Deserialize;

use crate::error::CoreError;
use crate::shot::NewShot;

#[derive(Debug, Deserialize)]
struct StoryboardDocument {
    #[serde(default)]
    shots: Vec<StoryboardEntry>,
}

#[derive(Debug, Deserialize)]
struct StoryboardEntry {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    order: u32,
    #[serde(default)]
    transition: String,
}

/// Parse a storyboard document into shot inputs, in document order.
pub fn parse_storyboard(bytes: &[u8]) -> Result<Vec<NewShot>, CoreError> {
    let doc: StoryboardDocument = serde_json::from_slice(bytes)
        .map_err(|e| CoreError::Validation(format!("Invalid storyboard document: {e}")))?;

    if doc.shots.is_empty() {
        return Err(CoreError::Validation(
            "Storyboard document contains no shots".to_string(),
        ));
    }

    Ok(doc
        .shots
        .into_iter()
        .enumerate()
        .map(|(i, entry)| NewShot {
            order: if entry.order == 0 { i as u32 + 1 } else { entry.order },
            title: entry.title,
            description: entry.description,
            prompt: entry.prompt,
            transition: entry.transition,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_shots_in_order() {
        let doc = br#"{"shots":[
            {"title":"A","description":"first","prompt":"p1"},
            {"title":"B","description":"second","prompt":"p2","transition":"fade"}
        ]}"#;
        let shots = parse_storyboard(doc).unwrap();
        assert_eq!(shots.len(), 2);
        assert_eq!(shots[0].order, 1);
        assert_eq!(shots[1].order, 2);
        assert_eq!(shots[1].transition, "fade");
    }

    #[test]
    fn explicit_order_is_kept() {
        let doc = br#"{"shots":[{"title":"A","prompt":"p","order":7}]}"#;
        assert_eq!(parse_storyboard(doc).unwrap()[0].order, 7);
    }

    #[test]
    fn empty_document_is_rejected() {
        assert_matches!(parse_storyboard(br#"{"shots":[]}"#), Err(CoreError::Validation(_)));
        assert_matches!(parse_storyboard(b"{}"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert_matches!(parse_storyboard(b"not json"), Err(CoreError::Validation(_)));
    }
}
