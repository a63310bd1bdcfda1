//! Geo-radius predicate and name-similarity scoring used by the
//! duplicate detector and the spatial queries.

use crate::element::Coordinates;

/// Kilometres-to-degrees conversion factor (flat approximation).
pub const KM_PER_DEGREE: f64 = 110.0;

/// True when `point` lies within a circle of `radius_km` around
/// `center`, measured in degree space (radius = km / 110).
pub fn within_center(center: Coordinates, radius_km: f64, point: Coordinates) -> bool {
    let radius_deg = radius_km / KM_PER_DEGREE;
    let dlat = center.lat - point.lat;
    let dlng = center.lng - point.lng;
    dlat * dlat + dlng * dlng <= radius_deg * radius_deg
}

/// Lowercased word tokens of a name.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Full-text relevance of `candidate` against `query`: shared-token
/// count, doubled when one name contains the other. Zero means no
/// match. Deterministic for identical inputs.
pub fn name_score(query: &str, candidate: &str) -> u32 {
    let query_tokens = tokenize(query);
    let candidate_tokens = tokenize(candidate);
    if query_tokens.is_empty() || candidate_tokens.is_empty() {
        return 0;
    }

    let mut score = query_tokens
        .iter()
        .filter(|t| candidate_tokens.contains(t))
        .count() as u32;

    let q = query.to_lowercase();
    let c = candidate.to_lowercase();
    if score > 0 && (c.contains(&q) || q.contains(&c)) {
        score *= 2;
    }
    score
}
