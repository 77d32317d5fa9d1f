//! Gradient refinement: local least-squares polish of promising candidates.
//!
//! The local budget is expensive, so only candidates passing two gates get
//! it: a product-root score above the adaptive `grad_check` threshold, and
//! enough area overlap between simulated and experimental curves for a
//! finite-difference Jacobian to mean anything. Survivors run through a
//! dampened Gauss-Newton solve clipped to the bound box; successes are
//! re-scored as full individuals and offered to the archives.

use crate::compute::numeric;
use crate::compute::parallel::ParallelMap;
use crate::compute::sim::{SimulationError, SimulatorBackend};

use super::evaluator::{EvalContext, Evaluation, ObjectiveEvaluator};

/// Minimum overlap-area ratio a candidate needs to enter the local solve.
pub const OVERLAP_CUTOFF: f64 = 0.01;

/// Step-norm convergence tolerance of the local solve.
pub const XTOL: f64 = 1e-8;

const MAX_ITERATIONS: usize = 40;
const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e10;

/// Failure local to one gradient candidate.
///
/// Caught per candidate: the candidate is dropped, its siblings are
/// unaffected, and the evolutionary loop never sees the error.
#[derive(Debug, thiserror::Error)]
pub enum GradientError {
    #[error("simulation failed during sensitivity estimation: {0}")]
    Simulation(#[from] SimulationError),
    #[error("gradient solve degenerate: {0}")]
    Degenerate(String),
}

/// A successfully refined candidate with its fresh evaluation.
#[derive(Debug, Clone)]
pub struct Refined {
    pub individual: Vec<f64>,
    pub evaluation: Evaluation,
}

/// Fraction of the experimental curve area covered by the simulation.
///
/// None when the evaluation failed outright. A candidate whose curve does
/// not overlap the data carries no exploitable local gradient.
pub fn overlap_ratio(evaluation: &Evaluation) -> Option<f64> {
    let experiments = evaluation.experiments.as_ref()?;

    let mut area_total = 0.0;
    let mut area_overlap = 0.0;
    for experiment in experiments {
        for ((times, sim), exp) in experiment
            .sim_times
            .iter()
            .zip(&experiment.sim_values)
            .zip(&experiment.exp_values)
        {
            area_total += numeric::trapz(times, exp);
            let pointwise_min: Vec<f64> = sim
                .iter()
                .zip(exp.iter())
                .map(|(s, e)| s.min(*e))
                .collect();
            area_overlap += numeric::trapz(times, &pointwise_min);
        }
    }

    if area_total <= 0.0 {
        return Some(0.0);
    }
    Some(area_overlap / area_total)
}

pub struct GradientRefiner<'a> {
    ctx: &'a EvalContext,
    backend: &'a dyn SimulatorBackend,
}

impl<'a> GradientRefiner<'a> {
    pub fn new(ctx: &'a EvalContext, backend: &'a dyn SimulatorBackend) -> Self {
        Self { ctx, backend }
    }

    /// Refine the gradient-worthy subset of `offspring`.
    ///
    /// `offspring` pairs each candidate with the evaluation it received in
    /// this generation's evaluation pass. Returns the updated `grad_check`
    /// threshold (monotone non-decreasing) and the refined individuals.
    pub fn refine<M: ParallelMap>(
        &self,
        grad_check: f64,
        offspring: &[(Vec<f64>, Evaluation)],
        check_all: bool,
        pmap: &M,
    ) -> (f64, Vec<Refined>) {
        let candidates: Vec<Vec<f64>> = offspring
            .iter()
            .filter(|(_, evaluation)| check_all || evaluation.product_score() > grad_check)
            .filter(|(individual, evaluation)| match overlap_ratio(evaluation) {
                Some(ratio) if ratio > OVERLAP_CUTOFF => true,
                Some(_) => {
                    log::info!(
                        "dropped {} from gradient refinement: insufficient overlap",
                        super::pareto::save_name(individual)
                    );
                    false
                }
                None => {
                    log::info!(
                        "dropped {} from gradient refinement: failed evaluation",
                        super::pareto::save_name(individual)
                    );
                    false
                }
            })
            .map(|(individual, _)| individual.clone())
            .collect();

        let solved = pmap.map(&candidates, |start| match self.solve(start) {
            Ok(solution) => Some(solution),
            Err(e) => {
                log::debug!("gradient candidate dropped: {e}");
                None
            }
        });

        let evaluator = ObjectiveEvaluator::new(self.ctx, self.backend);
        let mut refined = Vec::new();
        let mut best_product = f64::NEG_INFINITY;
        for solution in solved.into_iter().flatten() {
            let evaluation = evaluator.evaluate(&solution, "GRAD");
            if evaluation.failed() {
                continue;
            }
            best_product = best_product.max(evaluation.product_score());
            refined.push(Refined {
                individual: self.ctx.clip(&solution),
                evaluation,
            });
        }

        let mut grad_check = grad_check;
        if !refined.is_empty() && 0.9 * best_product > grad_check {
            grad_check = 0.9 * best_product;
        }

        (grad_check, refined)
    }

    /// Bounded dampened Gauss-Newton least-squares solve.
    ///
    /// Residuals are the per-score minimization transforms (or raw sample
    /// residuals in gradient-vector mode); the Jacobian is estimated with
    /// 3-point finite differences whose probes stay inside the bound box.
    pub fn solve(&self, start: &[f64]) -> Result<Vec<f64>, GradientError> {
        let evaluator = ObjectiveEvaluator::new(self.ctx, self.backend);

        let mut x = self.ctx.clip(start);
        let mut residuals = evaluator.residuals(&x)?;
        if residuals.is_empty() {
            return Err(GradientError::Degenerate("no residuals".to_string()));
        }
        let mut cost: f64 = residuals.iter().map(|r| r * r).sum();

        let dims = x.len();
        let mut lambda = LAMBDA_INIT;

        for _ in 0..MAX_ITERATIONS {
            let jacobian = self.jacobian(&evaluator, &x, residuals.len())?;

            // Normal equations with Levenberg dampening on the diagonal.
            let mut a = vec![vec![0.0f64; dims]; dims];
            let mut g = vec![0.0f64; dims];
            for row in &jacobian {
                for (i, ri) in row.iter().enumerate() {
                    for (j, rj) in row.iter().enumerate() {
                        a[i][j] += ri * rj;
                    }
                }
            }
            for (row, r) in jacobian.iter().zip(residuals.iter()) {
                for (i, ji) in row.iter().enumerate() {
                    g[i] -= ji * r;
                }
            }
            for i in 0..dims {
                a[i][i] += lambda * a[i][i].max(1e-12);
            }

            let mut step = g.clone();
            if numeric::solve_linear(&mut a, &mut step).is_err() {
                lambda = (lambda * 10.0).min(LAMBDA_MAX);
                continue;
            }

            let candidate: Vec<f64> = x
                .iter()
                .zip(step.iter())
                .map(|(xi, di)| xi + di)
                .collect();
            let candidate = self.ctx.clip(&candidate);

            let trial = evaluator.residuals(&candidate)?;
            let trial_cost: f64 = trial.iter().map(|r| r * r).sum();

            if trial_cost < cost {
                let step_norm: f64 = candidate
                    .iter()
                    .zip(x.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                let x_norm: f64 = x.iter().map(|v| v * v).sum::<f64>().sqrt();

                x = candidate;
                residuals = trial;
                cost = trial_cost;
                lambda = (lambda / 3.0).max(1e-12);

                if step_norm <= XTOL * (XTOL + x_norm) {
                    break;
                }
            } else {
                lambda *= 4.0;
                if lambda > LAMBDA_MAX {
                    break;
                }
            }
        }

        Ok(x)
    }

    /// 3-point finite-difference Jacobian, rows = residuals, cols = dims.
    fn jacobian(
        &self,
        evaluator: &ObjectiveEvaluator<'_>,
        x: &[f64],
        residual_count: usize,
    ) -> Result<Vec<Vec<f64>>, GradientError> {
        let dims = x.len();
        let mut jacobian = vec![vec![0.0f64; dims]; residual_count];

        for j in 0..dims {
            let h = f64::EPSILON.cbrt() * x[j].abs().max(1.0);

            let mut forward = x.to_vec();
            forward[j] = (x[j] + h).min(self.ctx.max_value[j]);
            let mut backward = x.to_vec();
            backward[j] = (x[j] - h).max(self.ctx.min_value[j]);

            let span = forward[j] - backward[j];
            if span <= 0.0 {
                continue;
            }

            let rf = evaluator.residuals(&forward)?;
            let rb = evaluator.residuals(&backward)?;
            if rf.len() != residual_count || rb.len() != residual_count {
                return Err(GradientError::Degenerate(
                    "residual length changed during differencing".to_string(),
                ));
            }

            for (row, (f, b)) in jacobian.iter_mut().zip(rf.iter().zip(rb.iter())) {
                row[j] = (f - b) / span;
            }
        }

        Ok(jacobian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::estimation::evaluator::{ExperimentResult, meta_scores};

    fn evaluation_with_curves(sim: Vec<f64>, exp: Vec<f64>) -> Evaluation {
        let times: Vec<f64> = (0..sim.len()).map(|i| i as f64).collect();
        Evaluation {
            objectives: vec![0.5],
            meta: meta_scores(&[0.5], 0.0),
            error: 0.0,
            csv_row: vec!["EVO".to_string()],
            experiments: Some(vec![ExperimentResult {
                name: "main".to_string(),
                scores: vec![0.5],
                error: 0.0,
                sim_times: vec![times],
                sim_values: vec![sim],
                exp_values: vec![exp],
                minimize: vec![0.5],
                diff: vec![0.0],
            }]),
        }
    }

    #[test]
    fn test_overlap_identical_curves() {
        let curve = vec![0.0, 1.0, 2.0, 1.0, 0.0];
        let evaluation = evaluation_with_curves(curve.clone(), curve);
        let ratio = overlap_ratio(&evaluation).unwrap();
        assert!((ratio - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_overlap_disjoint_curves_is_zero() {
        // Simulated peak where the data is flat zero and vice versa.
        let sim = vec![1.0, 1.0, 0.0, 0.0, 0.0];
        let exp = vec![0.0, 0.0, 0.0, 1.0, 1.0];
        let evaluation = evaluation_with_curves(sim, exp);
        let ratio = overlap_ratio(&evaluation).unwrap();
        assert!(ratio < OVERLAP_CUTOFF);
    }

    #[test]
    fn test_overlap_failed_evaluation_is_none() {
        let evaluation = Evaluation {
            objectives: vec![0.0],
            meta: [0.0; 5],
            error: f64::MAX,
            csv_row: Vec::new(),
            experiments: None,
        };
        assert!(overlap_ratio(&evaluation).is_none());
    }
}
