use crate::identity::Identity;
use crate::provider::DistanceMetric;
use crate::registry::Registry;
use crate::types::Embedding;

/// Result of matching a probe embedding against the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Match {
    Known {
        identity: Identity,
        distance: f32,
    },
    Unknown {
        /// Distance to the closest entry, if the registry had any finite one.
        nearest: Option<f32>,
    },
}

impl Match {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Match::Known { identity, .. } => Some(identity),
            Match::Unknown { .. } => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Match::Known { .. })
    }
}

/// Strategy for identifying a probe embedding against the registry.
pub trait Matcher {
    fn identify(&self, probe: &Embedding, registry: &Registry) -> Match;
}

/// Nearest-neighbour matcher.
///
/// Every entry within tolerance is a candidate and the closest candidate
/// wins. Equal distances go to the smaller [`Identity`], so the answer never
/// depends on the order entries are visited in.
pub struct NearestMatcher<M> {
    metric: M,
    tolerance: f32,
}

impl<M: DistanceMetric> NearestMatcher<M> {
    pub fn new(metric: M) -> Self {
        let tolerance = metric.tolerance();
        Self { metric, tolerance }
    }

    /// Override the metric's default tolerance.
    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }
}

impl<M: DistanceMetric> Matcher for NearestMatcher<M> {
    fn identify(&self, probe: &Embedding, registry: &Registry) -> Match {
        let mut best: Option<(f32, &Identity)> = None;
        let mut nearest: Option<f32> = None;

        for (identity, reference) in registry.iter() {
            let distance = self.metric.distance(probe, reference);
            if !distance.is_finite() {
                continue;
            }
            nearest = Some(nearest.map_or(distance, |n| n.min(distance)));

            if distance > self.tolerance {
                continue;
            }
            let closer = match best {
                None => true,
                Some((best_distance, best_identity)) => {
                    distance < best_distance
                        || (distance == best_distance && identity < best_identity)
                }
            };
            if closer {
                best = Some((distance, identity));
            }
        }

        match best {
            Some((distance, identity)) => Match::Known {
                identity: identity.clone(),
                distance,
            },
            None => Match::Unknown { nearest },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Euclidean;

    fn id(key: &str) -> Identity {
        Identity::from_key(key).unwrap()
    }

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn matcher() -> NearestMatcher<Euclidean> {
        NearestMatcher::new(Euclidean::default())
    }

    #[test]
    fn test_picks_minimum_distance_not_first_compatible() {
        // Both entries are within tolerance; the first in iteration order
        // (Aaron) is farther than the second (Zoe).
        let mut registry = Registry::new();
        registry.insert(id("Aaron_1"), emb(&[0.5, 0.0]));
        registry.insert(id("Zoe_2"), emb(&[0.1, 0.0]));

        let result = matcher().identify(&emb(&[0.0, 0.0]), &registry);
        assert_eq!(result.identity(), Some(&id("Zoe_2")));
        let Match::Known { distance, .. } = result else { unreachable!() };
        assert!((distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_beyond_tolerance() {
        let mut registry = Registry::new();
        registry.insert(id("Alice_101"), emb(&[1.0, 0.0]));
        registry.insert(id("Bob_102"), emb(&[0.0, 1.0]));

        let result = matcher().identify(&emb(&[-1.0, -1.0]), &registry);
        assert!(!result.is_known());
        let Match::Unknown { nearest: Some(nearest) } = result else {
            panic!("expected nearest distance, got {result:?}");
        };
        assert!(nearest > 0.6);
    }

    #[test]
    fn test_boundary_distance_is_compatible() {
        let mut registry = Registry::new();
        registry.insert(id("Alice_101"), emb(&[0.5, 0.0]));
        let result = matcher()
            .with_tolerance(0.5)
            .identify(&emb(&[0.0, 0.0]), &registry);
        assert!(result.is_known());
    }

    #[test]
    fn test_exact_tie_goes_to_smaller_identity() {
        let mut registry = Registry::new();
        registry.insert(id("Bob_102"), emb(&[0.0, 0.2]));
        registry.insert(id("Alice_101"), emb(&[0.2, 0.0]));
        let result = matcher().identify(&emb(&[0.0, 0.0]), &registry);
        assert_eq!(result.identity(), Some(&id("Alice_101")));
    }

    #[test]
    fn test_empty_registry_is_unknown() {
        let result = matcher().identify(&emb(&[0.0]), &Registry::new());
        assert_eq!(result, Match::Unknown { nearest: None });
    }

    #[test]
    fn test_dimension_mismatch_never_matches() {
        let mut registry = Registry::new();
        registry.insert(id("Alice_101"), emb(&[0.0, 0.0, 0.0]));
        let result = matcher().identify(&emb(&[0.0, 0.0]), &registry);
        assert_eq!(result, Match::Unknown { nearest: None });
    }

    struct Manhattan;

    impl DistanceMetric for Manhattan {
        fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
            a.values.iter().zip(&b.values).map(|(x, y)| (x - y).abs()).sum()
        }

        fn tolerance(&self) -> f32 {
            1.0
        }
    }

    #[test]
    fn test_uses_provider_metric_and_tolerance() {
        let mut registry = Registry::new();
        registry.insert(id("Alice_101"), emb(&[0.5, 0.4]));
        // Euclidean ≈ 0.64 (rejected at 0.6), Manhattan = 0.9 (accepted at 1.0).
        let probe = emb(&[0.0, 0.0]);
        assert!(!matcher().identify(&probe, &registry).is_known());
        let manhattan = NearestMatcher::new(Manhattan);
        assert_eq!(manhattan.tolerance(), 1.0);
        assert!(manhattan.identify(&probe, &registry).is_known());
    }
}
