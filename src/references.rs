//! Groups retrieval hits by source document for display.

use serde::{Deserialize, Serialize};

use crate::retrieval::RetrievalResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceHit {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub filename: String,
    #[serde(rename = "sourcePath")]
    pub source_path: String,
    pub hits: Vec<ReferenceHit>,
}

/// Groups results by their raw source identifier, preserving first-seen
/// group order and encounter order of hits within a group. The display
/// filename is the final path segment of the source identifier.
pub fn aggregate_references(results: &[RetrievalResult]) -> Vec<Reference> {
    let mut references: Vec<Reference> = Vec::new();
    for result in results {
        let hit = ReferenceHit {
            text: result.text.clone(),
            page: result.page,
            score: result.score,
        };
        match references
            .iter_mut()
            .find(|r| r.source_path == result.source_id)
        {
            Some(reference) => reference.hits.push(hit),
            None => references.push(Reference {
                filename: filename_of(&result.source_id),
                source_path: result.source_id.clone(),
                hits: vec![hit],
            }),
        }
    }
    references
}

pub(crate) fn filename_of(source_id: &str) -> String {
    source_id
        .rsplit('/')
        .next()
        .unwrap_or(source_id)
        .to_string()
}
