use std::cmp::Ordering;
use std::sync::Arc;

use crate::layout::TemplateEntry;
use crate::platform::Similarity;
use crate::types::{MatchResult, ScreenSnapshot};

/// Hits of the same key closer than this are one on-screen element.
const MERGE_RADIUS: f64 = 6.0;

/// Best confidence first; equal confidence falls back to the on-screen order
/// of [`bottom_most`] so results are stable across runs.
pub fn rank(a: &MatchResult, b: &MatchResult) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then(b.at.y.cmp(&a.at.y))
        .then(a.at.x.cmp(&b.at.x))
}

/// Pick the lowest match on screen (largest y), leftmost on a tie.
/// Used for rows of identical buttons where the newest entry sits at the bottom.
pub fn bottom_most(matches: &[MatchResult]) -> Option<&MatchResult> {
    matches.iter().min_by(|a, b| b.at.y.cmp(&a.at.y).then(a.at.x.cmp(&b.at.x)))
}

/// Thin wrapper over the external similarity primitive.
#[derive(Clone)]
pub struct TemplateMatcher {
    similarity: Arc<dyn Similarity>,
}

impl TemplateMatcher {
    pub fn new(similarity: Arc<dyn Similarity>) -> Self {
        Self { similarity }
    }

    /// Match every path of every candidate against one snapshot.
    ///
    /// A candidate's own threshold overrides `min_confidence`. Results are
    /// ordered by [`rank`]; an empty vector means nothing met its threshold.
    pub fn find(
        &self,
        snapshot: &ScreenSnapshot,
        candidates: &[&TemplateEntry],
        min_confidence: f32,
    ) -> anyhow::Result<Vec<MatchResult>> {
        let mut results: Vec<MatchResult> = Vec::new();
        for entry in candidates {
            let threshold = entry.threshold.unwrap_or(min_confidence);
            for path in &entry.paths {
                for hit in self.similarity.locate(snapshot, path, threshold)? {
                    if hit.confidence < threshold {
                        continue;
                    }
                    let dup = results
                        .iter_mut()
                        .find(|m| m.key == entry.key && m.at.distance(hit.at) < MERGE_RADIUS);
                    match dup {
                        Some(m) if m.confidence >= hit.confidence => {}
                        Some(m) => {
                            m.at = hit.at;
                            m.confidence = hit.confidence;
                            m.template = path.clone();
                        }
                        None => results.push(MatchResult {
                            key: entry.key.clone(),
                            template: path.clone(),
                            at: hit.at,
                            confidence: hit.confidence,
                        }),
                    }
                }
            }
        }
        results.sort_by(rank);
        Ok(results)
    }
}
