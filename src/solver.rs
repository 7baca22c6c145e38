//! Route construction and local search over a candidate pool.
//!
//! Everything here works in the dense index space of a [`SearchSpace`]:
//! node 0 is the start, nodes `1..=n` are the pool candidates and node
//! `n + 1` is the end. The planner maps results back to universe indices.

use std::cmp::Ordering;

use rand::SeedableRng;
use rand::seq::index;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::scoring::RouteScorer;

/// Smallest distance reduction that counts as an improvement. Guards the
/// local search against cycling on floating-point noise.
const IMPROVEMENT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct SolveOptions {
    /// Routes with at most this many stops use random sampling; larger
    /// routes use the greedy builder.
    pub sampling_threshold: usize,
    /// Number of random subsets drawn by the sampling optimizer.
    pub sampling_iterations: usize,
    /// When set, sampled routes whose consecutive stops move backwards
    /// along the corridor by more than this fraction are only used if no
    /// route stays within it.
    pub max_backtrack: Option<f64>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            sampling_threshold: 8,
            sampling_iterations: 1000,
            max_backtrack: None,
        }
    }
}

/// Distances between the start, the pool candidates and the end.
#[derive(Debug, Clone)]
pub struct SearchSpace {
    matrix: Vec<Vec<f64>>,
    progress: Vec<f64>,
}

impl SearchSpace {
    /// `matrix` is square with the start in row/column 0 and the end in the
    /// last row/column. Candidate-to-candidate entries are expected to be
    /// symmetric, as walking distances are.
    pub fn new(matrix: Vec<Vec<f64>>) -> Self {
        Self {
            matrix,
            progress: Vec::new(),
        }
    }

    /// Attaches each candidate's corridor position (one entry per
    /// candidate, in node order) for the forward-progress check.
    pub fn with_progress(mut self, progress: Vec<f64>) -> Self {
        self.progress = progress;
        self
    }

    pub const START: usize = 0;

    pub fn end(&self) -> usize {
        self.matrix.len().saturating_sub(1)
    }

    /// Number of candidate nodes between the anchors.
    pub fn candidate_count(&self) -> usize {
        self.matrix.len().saturating_sub(2)
    }

    pub fn distance(&self, from: usize, to: usize) -> f64 {
        self.matrix[from][to]
    }

    pub fn leg_distances(&self, path: &[usize]) -> Vec<f64> {
        path.windows(2).map(|leg| self.distance(leg[0], leg[1])).collect()
    }

    pub fn path_distance(&self, path: &[usize]) -> f64 {
        path.windows(2).map(|leg| self.distance(leg[0], leg[1])).sum()
    }

    /// Orders `stops` by always walking to the nearest unvisited one,
    /// starting from the start. Returns the full path including anchors.
    pub fn nearest_neighbor(&self, stops: &[usize]) -> Vec<usize> {
        let mut remaining = stops.to_vec();
        let mut path = Vec::with_capacity(stops.len() + 2);
        path.push(Self::START);

        let mut current = Self::START;
        while let Some(position) =
            self.closest(&remaining, |candidate| self.distance(current, candidate))
        {
            current = remaining.remove(position);
            path.push(current);
        }

        path.push(self.end());
        path
    }

    /// 2-opt with the anchors fixed: repeatedly applies the segment
    /// reversal with the largest distance reduction until none reduces the
    /// total. Returns the number of reversals applied.
    ///
    /// Optimises raw distance only; re-score afterwards.
    pub fn two_opt(&self, path: &mut [usize]) -> usize {
        let len = path.len();
        if len < 4 {
            return 0;
        }

        let mut moves = 0;
        loop {
            let mut best: Option<(usize, usize)> = None;
            let mut best_delta = -IMPROVEMENT_EPSILON;

            for i in 0..len - 3 {
                for j in (i + 2)..len - 1 {
                    let delta = self.reversal_delta(path, i, j);
                    if delta < best_delta {
                        best_delta = delta;
                        best = Some((i, j));
                    }
                }
            }

            match best {
                Some((i, j)) => {
                    path[i + 1..=j].reverse();
                    moves += 1;
                }
                None => break,
            }
        }
        moves
    }

    /// Change in path distance from reversing `path[i + 1..=j]`.
    fn reversal_delta(&self, path: &[usize], i: usize, j: usize) -> f64 {
        let boundary = self.distance(path[i], path[j]) + self.distance(path[i + 1], path[j + 1])
            - self.distance(path[i], path[i + 1])
            - self.distance(path[j], path[j + 1]);
        // Interior edges flip direction; zero for a symmetric matrix.
        let interior: f64 = (i + 1..j)
            .map(|k| self.distance(path[k + 1], path[k]) - self.distance(path[k], path[k + 1]))
            .sum();
        boundary + interior
    }

    /// True when some stop sits more than `threshold` behind its
    /// predecessor along the corridor.
    pub fn violates_forward_progress(&self, path: &[usize], threshold: f64) -> bool {
        let end = self.end();
        let positions: Vec<f64> = path
            .iter()
            .filter(|node| **node != Self::START && **node != end)
            .filter_map(|node| self.progress.get(node - 1).copied())
            .collect();
        positions.windows(2).any(|pair| pair[1] < pair[0] - threshold)
    }

    /// Position in `nodes` minimising `cost`; the first wins on ties.
    fn closest(&self, nodes: &[usize], cost: impl Fn(usize) -> f64) -> Option<usize> {
        nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (position, cost(*node)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(position, _)| position)
    }
}

/// A route through a [`SearchSpace`], with its legs and objective value.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Node path including both anchors.
    pub path: Vec<usize>,
    pub legs: Vec<f64>,
    pub score: f64,
}

impl Solution {
    fn evaluate(space: &SearchSpace, path: Vec<usize>, scorer: &RouteScorer) -> Self {
        let legs = space.leg_distances(&path);
        let score = scorer.score(&legs);
        Self { path, legs, score }
    }

    pub fn distance(&self) -> f64 {
        self.legs.iter().sum()
    }
}

/// Picks `stops` candidates and orders them, choosing the sampling or the
/// greedy strategy by size. Returns `None` if the space holds fewer than
/// `stops` candidates.
pub fn solve(
    space: &SearchSpace,
    stops: usize,
    scorer: &RouteScorer,
    options: &SolveOptions,
    seed: u64,
) -> Option<Solution> {
    if stops > space.candidate_count() {
        return None;
    }
    if stops <= options.sampling_threshold {
        sample_and_optimize(space, stops, scorer, options, seed)
    } else {
        Some(greedy_with_improvement(space, stops, scorer))
    }
}

struct Sample {
    iteration: usize,
    admissible: bool,
    solution: Solution,
}

impl Sample {
    fn rank(&self, other: &Self) -> Ordering {
        other
            .admissible
            .cmp(&self.admissible)
            .then(self.solution.score.total_cmp(&other.solution.score))
            .then(self.iteration.cmp(&other.iteration))
    }
}

/// Draws `options.sampling_iterations` random subsets of `stops`
/// candidates, orders each by nearest neighbour, polishes it with 2-opt and
/// keeps the best score. Equal scores go to the earliest iteration.
///
/// Iterations run in parallel. Each one draws from its own ChaCha stream
/// of `seed`, so the result does not depend on scheduling.
pub fn sample_and_optimize(
    space: &SearchSpace,
    stops: usize,
    scorer: &RouteScorer,
    options: &SolveOptions,
    seed: u64,
) -> Option<Solution> {
    let pool = space.candidate_count();
    if stops > pool {
        return None;
    }

    let best = (0..options.sampling_iterations.max(1))
        .into_par_iter()
        .map(|iteration| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(iteration as u64);
            let subset: Vec<usize> = index::sample(&mut rng, pool, stops)
                .into_iter()
                .map(|offset| offset + 1)
                .collect();

            let mut path = space.nearest_neighbor(&subset);
            space.two_opt(&mut path);
            let admissible = options
                .max_backtrack
                .is_none_or(|threshold| !space.violates_forward_progress(&path, threshold));

            Sample {
                iteration,
                admissible,
                solution: Solution::evaluate(space, path, scorer),
            }
        })
        .min_by(Sample::rank)?;

    debug!(
        iteration = best.iteration,
        score = best.solution.score,
        admissible = best.admissible,
        "sampling finished"
    );
    Some(best.solution)
}

/// Builds one route by repeatedly appending the candidate that minimises
/// `distance(last, candidate) + distance(candidate, end)`, then polishes it
/// with 2-opt. Deterministic.
pub fn greedy_with_improvement(
    space: &SearchSpace,
    stops: usize,
    scorer: &RouteScorer,
) -> Solution {
    let end = space.end();
    let mut remaining: Vec<usize> = (1..=space.candidate_count()).collect();
    let mut path = Vec::with_capacity(stops + 2);
    path.push(SearchSpace::START);

    let mut last = SearchSpace::START;
    for _ in 0..stops {
        let lookahead =
            |candidate: usize| space.distance(last, candidate) + space.distance(candidate, end);
        let Some(position) = space.closest(&remaining, lookahead) else {
            break;
        };
        last = remaining.remove(position);
        path.push(last);
    }
    path.push(end);

    let moves = space.two_opt(&mut path);
    debug!(stops, moves, "greedy route polished");
    Solution::evaluate(space, path, scorer)
}
