//! Route objective: total distance plus a penalty for uneven leg lengths.

/// Scores ordered routes from their leg distances. Lower is better.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteScorer {
    uniformity_weight: f64,
}

impl RouteScorer {
    /// `uniformity_weight` in `[0, 1]`: 0 ranks purely by distance, 1 pays
    /// one meter of distance per meter of leg standard deviation.
    pub const fn new(uniformity_weight: f64) -> Self {
        Self { uniformity_weight }
    }

    pub const fn uniformity_weight(&self) -> f64 {
        self.uniformity_weight
    }

    /// `sum(legs) + uniformity_weight * population_std_dev(legs)`.
    pub fn score(&self, leg_distances: &[f64]) -> f64 {
        let total: f64 = leg_distances.iter().sum();
        total + self.uniformity_weight * population_std_dev(leg_distances)
    }
}

/// Standard deviation dividing by `n`. Zero for fewer than two values.
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
