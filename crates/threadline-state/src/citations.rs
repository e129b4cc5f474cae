//! Citation extraction from the shared state tree.
//!
//! The backend keeps a list of citation objects somewhere in the run state.
//! This module is the only place that knows that wire shape; everything else
//! sees [`SourceReference`].

use serde::Deserialize;
use serde_json::Value;
use threadline_types::SourceReference;

/// Candidate locations of the citation list, first match wins. Backends have
/// shipped both `citations` and `citation_registry` under `rag`.
const CITATION_POINTERS: &[&str] = &["/rag/citations", "/rag/citation_registry", "/citations"];

#[derive(Debug, Deserialize)]
struct CitationSchema {
    #[serde(deserialize_with = "string_or_number")]
    chunk_id: String,
    #[serde(deserialize_with = "string_or_number")]
    document_id: String,
    #[serde(default)]
    document_uri: Option<String>,
    #[serde(default, alias = "title")]
    document_title: Option<String>,
    #[serde(default, alias = "text")]
    content: String,
    #[serde(default)]
    headings: Vec<String>,
    #[serde(default)]
    page_numbers: Option<Vec<u32>>,
}

impl From<CitationSchema> for SourceReference {
    fn from(schema: CitationSchema) -> Self {
        Self {
            chunk_id: schema.chunk_id,
            document_id: schema.document_id,
            document_uri: schema.document_uri,
            title: schema.document_title,
            content: schema.content,
            headings: schema.headings,
            page_numbers: schema.page_numbers,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Raw citation list of a state snapshot; empty when absent.
pub fn citation_list(state: &Value) -> &[Value] {
    CITATION_POINTERS
        .iter()
        .find_map(|pointer| state.pointer(pointer).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Citations present in `after` that extend `before`.
///
/// The list is append-only on the server. If that ever breaks, entries up to
/// the first divergence are kept as known and everything after it counts as
/// new. Entries that do not map are logged and dropped.
pub fn extract_new_citations(before: &Value, after: &Value) -> Vec<SourceReference> {
    let known = citation_list(before);
    let current = citation_list(after);

    let common = known
        .iter()
        .zip(current)
        .take_while(|(old, new)| old == new)
        .count();

    if common < known.len() {
        tracing::warn!(
            known = known.len(),
            current = current.len(),
            diverged_at = common,
            "citation list was not extended append-only"
        );
    }

    current[common..]
        .iter()
        .filter_map(|raw| match CitationSchema::deserialize(raw) {
            Ok(schema) => Some(SourceReference::from(schema)),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed citation");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn citation(id: &str) -> Value {
        json!({
            "chunk_id": id,
            "document_id": format!("doc-{}", id),
            "content": format!("excerpt {}", id),
        })
    }

    #[test]
    fn test_maps_every_field() {
        let after = json!({"rag": {"citations": [{
            "chunk_id": 17,
            "document_id": "d1",
            "document_uri": "s3://bucket/d1.pdf",
            "document_title": "Handbook",
            "content": "Refunds take 5 days.",
            "headings": ["Billing", "Refunds"],
            "page_numbers": [4, 5]
        }]}});

        let refs = extract_new_citations(&json!({}), &after);
        assert_eq!(
            refs,
            vec![SourceReference {
                chunk_id: "17".to_string(),
                document_id: "d1".to_string(),
                document_uri: Some("s3://bucket/d1.pdf".to_string()),
                title: Some("Handbook".to_string()),
                content: "Refunds take 5 days.".to_string(),
                headings: vec!["Billing".to_string(), "Refunds".to_string()],
                page_numbers: Some(vec![4, 5]),
            }]
        );
    }

    #[test]
    fn test_registry_field_is_accepted() {
        let after = json!({"rag": {"citation_registry": [citation("a")]}});
        let refs = extract_new_citations(&json!(null), &after);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].chunk_id, "a");
    }

    #[test]
    fn test_divergence_treats_tail_as_new() {
        let before = json!({"rag": {"citations": [citation("a"), citation("b")]}});
        let after = json!({"rag": {"citations": [citation("a"), citation("x"), citation("y")]}});

        let ids: Vec<String> = extract_new_citations(&before, &after)
            .into_iter()
            .map(|r| r.chunk_id)
            .collect();
        assert_eq!(ids, vec!["x", "y"]);
    }

    #[test]
    fn test_shrinking_list_yields_nothing() {
        let before = json!({"rag": {"citations": [citation("a"), citation("b")]}});
        let after = json!({"rag": {"citations": [citation("a")]}});
        assert!(extract_new_citations(&before, &after).is_empty());
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let after = json!({"rag": {"citations": [{"content": "no ids"}, citation("ok")]}});
        let refs = extract_new_citations(&json!({}), &after);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].chunk_id, "ok");
    }
}
