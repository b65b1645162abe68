// src/service/forecast/isolation.rs
//! Bosque de aislamiento sobre (valor, cambio respecto al periodo anterior).
//!
//! Semilla fija: la misma serie produce siempre las mismas puntuaciones.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

use super::{Capability, ForecastModel, PointScore};
use crate::domain::error::ForecastError;
use crate::domain::model::forecast::RefreshCadence;

pub struct Isolation {
    pub trees: usize,
    pub sample_size: usize,
    pub seed: u64,
    pub threshold: f64,
}

type Point = [f64; 2];

enum Node {
    Leaf { size: usize },
    Split { feature: usize, at: f64, left: Box<Node>, right: Box<Node> },
}

/// Longitud media de una búsqueda fallida en un BST de `n` nodos.
fn c_factor(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * ((n - 1.0).ln() + 0.577_215_664_9) - 2.0 * (n - 1.0) / n
}

fn build(points: &[Point], depth: usize, max_depth: usize, rng: &mut StdRng) -> Node {
    if points.len() <= 1 || depth >= max_depth {
        return Node::Leaf { size: points.len() };
    }
    // Sólo se parte por atributos con rango no nulo.
    let candidates: Vec<(usize, f64, f64)> = (0..2)
        .filter_map(|f| {
            let lo = points.iter().map(|p| p[f]).fold(f64::INFINITY, f64::min);
            let hi = points.iter().map(|p| p[f]).fold(f64::NEG_INFINITY, f64::max);
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();
    if candidates.is_empty() {
        return Node::Leaf { size: points.len() };
    }
    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    let at = rng.gen_range(lo..hi);
    let (left, right): (Vec<Point>, Vec<Point>) = points.iter().partition(|p| p[feature] < at);
    Node::Split {
        feature,
        at,
        left: Box::new(build(&left, depth + 1, max_depth, rng)),
        right: Box::new(build(&right, depth + 1, max_depth, rng)),
    }
}

fn path_length(node: &Node, p: &Point, depth: f64) -> f64 {
    match node {
        Node::Leaf { size } => depth + c_factor(*size),
        Node::Split { feature, at, left, right } => {
            if p[*feature] < *at {
                path_length(left, p, depth + 1.0)
            } else {
                path_length(right, p, depth + 1.0)
            }
        }
    }
}

impl ForecastModel for Isolation {
    fn id(&self) -> &'static str {
        "isolation"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::AnomalyScore]
    }

    fn refresh(&self) -> RefreshCadence {
        RefreshCadence::Daily
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn score(&self, values: &[f64], _season: usize) -> Result<Vec<PointScore>, ForecastError> {
        let n = values.len();
        if n < 2 {
            return Ok(Vec::new());
        }
        let points: Vec<Point> = values
            .iter()
            .enumerate()
            .map(|(i, v)| [*v, if i == 0 { 0.0 } else { v - values[i - 1] }])
            .collect();

        let psi = self.sample_size.clamp(2, n);
        let max_depth = (psi as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let forest: Vec<Node> = (0..self.trees.max(1))
            .map(|_| {
                let subsample: Vec<Point> = sample(&mut rng, n, psi).into_iter().map(|i| points[i]).collect();
                build(&subsample, 0, max_depth, &mut rng)
            })
            .collect();

        let norm = c_factor(psi);
        Ok(points
            .iter()
            .map(|p| {
                let avg = forest.iter().map(|t| path_length(t, p, 0.0)).sum::<f64>() / forest.len() as f64;
                // Camino corto = más aislado. La desviación es el camino negado.
                let score = if norm > 0.0 { 2f64.powf(-avg / norm) } else { 0.0 };
                PointScore { expected: None, deviation: -avg, score: score.clamp(0.0, 1.0) }
            })
            .collect())
    }
}
