//! Identity matching: nearest enrolled descriptor under an acceptance threshold.

use crate::types::{Descriptor, Employee};

/// Default acceptance threshold for Euclidean distance between descriptors.
///
/// 0.6 is the usual figure for dlib-style descriptors; attendance uses a
/// stricter value to keep false accepts down.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// Result of matching a probe descriptor against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub matched: bool,
    /// Smallest distance seen across the gallery, `None` for an empty gallery.
    pub best_distance: Option<f32>,
    /// Gallery index of the accepted candidate.
    pub index: Option<usize>,
    /// Employee id of the accepted candidate.
    pub employee_id: Option<String>,
}

impl MatchOutcome {
    fn no_match(best_distance: Option<f32>) -> Self {
        Self {
            matched: false,
            best_distance,
            index: None,
            employee_id: None,
        }
    }
}

/// Strategy for finding an enrolled employee for a probe descriptor.
///
/// Implementations must return the same outcome for the same gallery order
/// and probe. A linear scan is fine for small populations; an indexed
/// nearest-neighbour structure can replace it behind this trait.
pub trait Matcher: Send + Sync {
    fn best_match(&self, probe: &Descriptor, gallery: &[Employee], threshold: f32)
        -> MatchOutcome;
}

/// Linear-scan Euclidean matcher.
///
/// Visits every gallery entry. Ties go to the first entry in iteration order.
#[derive(Debug, Default, Clone, Copy)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        probe: &Descriptor,
        gallery: &[Employee],
        threshold: f32,
    ) -> MatchOutcome {
        let pairs = gallery
            .iter()
            .map(|e| (e.employee_id.as_str(), &e.descriptor));
        match scan(probe, pairs) {
            Some((idx, best)) if best < threshold => MatchOutcome {
                matched: true,
                best_distance: Some(best),
                index: Some(idx),
                employee_id: Some(gallery[idx].employee_id.clone()),
            },
            Some((_, best)) => MatchOutcome::no_match(Some(best)),
            None => MatchOutcome::no_match(None),
        }
    }
}

/// Match a query against `(employee_id, descriptor)` candidates.
///
/// Returns the id of the closest candidate iff its distance is strictly below
/// `threshold`. An empty candidate set is "no match", not an error.
pub fn match_identity<'a, I>(query: &Descriptor, candidates: I, threshold: f32) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, &'a Descriptor)>,
{
    let candidates: Vec<(&'a str, &'a Descriptor)> = candidates.into_iter().collect();
    match scan(query, candidates.iter().copied()) {
        Some((idx, best)) if best < threshold => Some(candidates[idx].0),
        _ => None,
    }
}

/// Index and distance of the closest candidate. Candidates with a different
/// dimension from the probe are skipped.
fn scan<'a, I>(probe: &Descriptor, candidates: I) -> Option<(usize, f32)>
where
    I: Iterator<Item = (&'a str, &'a Descriptor)>,
{
    let mut best: Option<(usize, f32)> = None;

    for (i, (employee_id, descriptor)) in candidates.enumerate() {
        let dist = match probe.distance(descriptor) {
            Ok(d) => d,
            Err(err) => {
                tracing::warn!(employee_id, error = %err, "skipping candidate with incompatible descriptor");
                continue;
            }
        };
        // Strict comparison keeps the first of equidistant candidates.
        let is_better = match best {
            None => true,
            Some((_, prev)) => dist < prev,
        };
        if is_better {
            best = Some((i, dist));
        }
    }

    best
}
