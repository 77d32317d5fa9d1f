//! Search orchestration: the generational loop around evaluation,
//! refinement and archival.
//!
//! The orchestrator owns the strict per-generation sequence: evaluate the
//! whole population, then gradient-refine the filtered subset, then merge
//! archive updates — refinement never runs ahead of the evaluation pass it
//! depends on, and archives plus the `grad_check` threshold have a single
//! writer per generation.

use std::time::{Duration, Instant};

use rand::prelude::*;

use crate::compute::parallel::ParallelMap;
use crate::compute::sim::SimulatorBackend;
use crate::schema::{ConfigError, MatchConfig};

use super::evaluator::{EvalContext, Evaluation, ObjectiveEvaluator};
use super::gradient::{GradientRefiner, Refined};
use super::pareto::{FrontEntry, ParetoFront, save_name};
use super::runlog::RunLog;
use super::target::TargetStore;

/// Errors out of the orchestrator itself. Per-candidate failures never
/// surface here.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot write results: {0}")]
    Io(#[from] std::io::Error),
}

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    Initializing,
    GenerationLoop,
    Terminated,
}

/// Why a search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxGenerations,
    Stagnation,
    TargetReached,
    SweepComplete,
}

/// Global-search strategies, resolved by name from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Generational evolutionary loop with per-generation refinement.
    Generational,
    /// One oversampled random sweep with a full gradient pass.
    Multistart,
}

impl Strategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "generational" => Some(Strategy::Generational),
            "multistart" => Some(Strategy::Multistart),
            _ => None,
        }
    }
}

/// Outcome of a finished search.
#[derive(Debug)]
pub struct SearchResult {
    /// Non-dominated set over raw per-feature objectives.
    pub front: ParetoFront,
    /// Non-dominated set over the five meta scores.
    pub meta_front: ParetoFront,
    pub generations: usize,
    pub evaluations: u64,
    pub best_product: f64,
    /// Component-wise best meta scores seen over the whole run.
    pub best_meta: [f64; 5],
    pub stop_reason: StopReason,
}

fn fold_best_meta(best: &mut [f64; 5], batch: &[(Vec<f64>, Evaluation)]) {
    for (_, evaluation) in batch {
        if evaluation.failed() {
            continue;
        }
        for (slot, value) in best.iter_mut().zip(evaluation.meta.iter()) {
            *slot = slot.max(*value);
        }
    }
}

/// RNG wrapper for population variation.
pub struct IndividualRng {
    rng: StdRng,
}

impl IndividualRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform random individual inside the bound box.
    pub fn uniform(&mut self, min: &[f64], max: &[f64]) -> Vec<f64> {
        min.iter()
            .zip(max.iter())
            .map(|(&lo, &hi)| self.rng.gen_range(lo..=hi))
            .collect()
    }

    /// Blend crossover of two parents.
    pub fn crossover(&mut self, a: &[f64], b: &[f64]) -> Vec<f64> {
        let t = self.rng.r#gen::<f64>();
        a.iter()
            .zip(b.iter())
            .map(|(&x, &y)| x * (1.0 - t) + y * t)
            .collect()
    }

    /// Gaussian mutation clipped to the bound box.
    ///
    /// The spread tightens as the parent's product-root score rises, so
    /// good candidates are perturbed gently while poor ones explore.
    pub fn mutate(
        &mut self,
        individual: &mut [f64],
        rate: f64,
        strength: f64,
        product: f64,
        min: &[f64],
        max: &[f64],
    ) {
        let effective = strength / (1.0 + 100.0 * product.max(0.0));
        for (i, value) in individual.iter_mut().enumerate() {
            if self.rng.r#gen::<f64>() < rate {
                let noise: f64 = self.rng.sample(rand_distr::StandardNormal);
                *value = (*value + noise * effective * (max[i] - min[i])).clamp(min[i], max[i]);
            }
        }
    }

    /// Tournament selection index over scalar scores.
    pub fn tournament(&mut self, scores: &[f64]) -> usize {
        let mut best = self.rng.gen_range(0..scores.len());
        for _ in 0..2 {
            let challenger = self.rng.gen_range(0..scores.len());
            if scores[challenger] > scores[best] {
                best = challenger;
            }
        }
        best
    }
}

/// Drives the search: Idle -> Initializing -> GenerationLoop -> Terminated.
pub struct SearchOrchestrator<'a, M> {
    ctx: EvalContext,
    backend: &'a dyn SimulatorBackend,
    pmap: M,
    strategy: Strategy,
    rng: IndividualRng,
    phase: SearchPhase,
}

impl<'a, M: ParallelMap> SearchOrchestrator<'a, M> {
    /// Bind configuration, bounds and the strategy registry.
    ///
    /// Validates the configuration, builds the target store and warms up
    /// each experiment template once; any failure is fatal before the first
    /// candidate simulation.
    pub fn new(
        config: MatchConfig,
        backend: &'a dyn SimulatorBackend,
        pmap: M,
    ) -> Result<Self, SearchError> {
        config.validate()?;

        let strategy = Strategy::from_name(&config.search.method)
            .ok_or_else(|| ConfigError::UnknownSearchMethod(config.search.method.clone()))?;

        let mut target = TargetStore::build(&config, backend)?;
        warm_up(&mut target, backend)?;

        let seed = config.search.rng_seed.unwrap_or_else(rand::random);
        log::info!(
            "search initialized: strategy={:?} variables={} seed={seed}",
            strategy,
            config.variable_count()
        );

        Ok(Self {
            ctx: EvalContext::new(config, target),
            backend,
            pmap,
            strategy,
            rng: IndividualRng::new(seed),
            phase: SearchPhase::Idle,
        })
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    /// Shared evaluation context (configuration, targets, headers).
    pub fn context(&self) -> &EvalContext {
        &self.ctx
    }

    /// Run the search to termination.
    pub fn run(&mut self) -> Result<SearchResult, SearchError> {
        self.phase = SearchPhase::Initializing;
        let log = RunLog::create(&self.ctx.config.output_dir, &self.ctx.headers)?;

        let result = match self.strategy {
            Strategy::Generational => self.run_generational(&log),
            Strategy::Multistart => self.run_multistart(&log),
        };

        self.phase = SearchPhase::Terminated;
        result
    }

    /// Initial population: log-transformed seeds plus uniform random fill.
    fn initial_population(&mut self, size: usize) -> Vec<Vec<f64>> {
        let mut population: Vec<Vec<f64>> = self
            .ctx
            .config
            .seeds
            .iter()
            .map(|seed| {
                let transformed: Vec<f64> = seed.iter().map(|v| v.ln()).collect();
                self.ctx.clip(&transformed)
            })
            .collect();

        while population.len() < size {
            population.push(self.rng.uniform(&self.ctx.min_value, &self.ctx.max_value));
        }
        population
    }

    fn run_generational(&mut self, log: &RunLog) -> Result<SearchResult, SearchError> {
        let settings = self.ctx.config.search.clone();

        let mut front = ParetoFront::new();
        let mut meta_front = ParetoFront::new();
        let mut grad_check = 0.0f64;
        let mut best_product = f64::NEG_INFINITY;
        let mut best_meta = [f64::NEG_INFINITY; 5];
        let mut evaluations = 0u64;
        let mut generation = 0usize;
        let mut last_progress = 0usize;

        let mut population = self.initial_population(settings.population);

        let stop_reason = loop {
            self.phase = SearchPhase::GenerationLoop;

            // Phase one: evaluate the full population.
            let evaluator = ObjectiveEvaluator::new(&self.ctx, self.backend);
            let evaluated = self
                .pmap
                .map(&population, |individual| {
                    evaluator.evaluate(individual, "EVO")
                });
            evaluations += population.len() as u64;

            let paired: Vec<(Vec<f64>, Evaluation)> =
                population.drain(..).zip(evaluated).collect();

            let mut progress =
                archive_generation(&paired, &mut front, &mut meta_front, log)?;

            // Phase two: gradient refinement of the filtered subset.
            let refiner = GradientRefiner::new(&self.ctx, self.backend);
            let (updated_check, refined) =
                refiner.refine(grad_check, &paired, false, &self.pmap);
            grad_check = updated_check;
            evaluations += refined.len() as u64;

            let refined_pairs: Vec<(Vec<f64>, Evaluation)> = refined
                .into_iter()
                .map(|Refined { individual, evaluation }| (individual, evaluation))
                .collect();
            progress |=
                archive_generation(&refined_pairs, &mut front, &mut meta_front, log)?;

            for (_, evaluation) in paired.iter().chain(&refined_pairs) {
                if !evaluation.failed() {
                    best_product = best_product.max(evaluation.product_score());
                }
            }
            fold_best_meta(&mut best_meta, &paired);
            fold_best_meta(&mut best_meta, &refined_pairs);

            generation += 1;
            if progress {
                last_progress = generation;
            }

            log::info!(
                "generation {generation}: front={} meta={} best={best_product:.4} gradCheck={grad_check:.4}",
                front.len(),
                meta_front.len()
            );

            if let Some(target) = settings.target_score
                && best_product >= target
            {
                break StopReason::TargetReached;
            }
            if generation >= settings.generations {
                break StopReason::MaxGenerations;
            }
            if let Some(limit) = settings.stagnation_limit
                && generation - last_progress >= limit
            {
                break StopReason::Stagnation;
            }

            population = self.vary(&paired, &refined_pairs, settings.population);
        };

        Ok(SearchResult {
            front,
            meta_front,
            generations: generation,
            evaluations,
            best_product,
            best_meta,
            stop_reason,
        })
    }

    /// Multistart: one oversampled random sweep with a full gradient pass.
    ///
    /// The sweep reuses the generational evaluate/refine/archive contract
    /// with `check_all` refinement instead of a bespoke control flow.
    fn run_multistart(&mut self, log: &RunLog) -> Result<SearchResult, SearchError> {
        let size = self.ctx.config.search.population * self.ctx.min_value.len().max(1);
        let population = self.initial_population(size);

        self.phase = SearchPhase::GenerationLoop;
        let evaluator = ObjectiveEvaluator::new(&self.ctx, self.backend);
        let evaluated = self
            .pmap
            .map(&population, |individual| {
                evaluator.evaluate(individual, "EVO")
            });
        let paired: Vec<(Vec<f64>, Evaluation)> =
            population.into_iter().zip(evaluated).collect();

        let mut front = ParetoFront::new();
        let mut meta_front = ParetoFront::new();
        archive_generation(&paired, &mut front, &mut meta_front, log)?;

        let refiner = GradientRefiner::new(&self.ctx, self.backend);
        let (_, refined) = refiner.refine(0.0, &paired, true, &self.pmap);
        let refined_pairs: Vec<(Vec<f64>, Evaluation)> = refined
            .into_iter()
            .map(|Refined { individual, evaluation }| (individual, evaluation))
            .collect();
        archive_generation(&refined_pairs, &mut front, &mut meta_front, log)?;

        let evaluations = (paired.len() + refined_pairs.len()) as u64;
        let best_product = paired
            .iter()
            .chain(&refined_pairs)
            .filter(|(_, e)| !e.failed())
            .map(|(_, e)| e.product_score())
            .fold(f64::NEG_INFINITY, f64::max);

        let mut best_meta = [f64::NEG_INFINITY; 5];
        fold_best_meta(&mut best_meta, &paired);
        fold_best_meta(&mut best_meta, &refined_pairs);

        Ok(SearchResult {
            front,
            meta_front,
            generations: 1,
            evaluations,
            best_product,
            best_meta,
            stop_reason: StopReason::SweepComplete,
        })
    }

    /// Produce the next generation by tournament, crossover and mutation.
    fn vary(
        &mut self,
        paired: &[(Vec<f64>, Evaluation)],
        refined: &[(Vec<f64>, Evaluation)],
        size: usize,
    ) -> Vec<Vec<f64>> {
        let settings = &self.ctx.config.search;
        let pool: Vec<&(Vec<f64>, Evaluation)> = paired.iter().chain(refined).collect();
        let scores: Vec<f64> = pool.iter().map(|(_, e)| e.product_score()).collect();

        let mut next = Vec::with_capacity(size);

        // Elitism: carry the best candidate unchanged.
        if let Some(best) = pool
            .iter()
            .enumerate()
            .max_by(|a, b| scores[a.0].partial_cmp(&scores[b.0]).unwrap())
        {
            next.push(best.1.0.clone());
        }

        while next.len() < size {
            let p1 = self.rng.tournament(&scores);
            let p2 = self.rng.tournament(&scores);

            let mut child = if self.rng.rng.r#gen::<f64>() < settings.crossover_rate {
                self.rng.crossover(&pool[p1].0, &pool[p2].0)
            } else {
                pool[p1].0.clone()
            };

            self.rng.mutate(
                &mut child,
                settings.mutation_rate,
                settings.mutation_strength,
                scores[p1].max(scores[p2]),
                &self.ctx.min_value,
                &self.ctx.max_value,
            );

            next.push(child);
        }

        next
    }
}

/// Archive one batch of evaluated candidates and emit their CSV rows.
///
/// Returns whether the meta front improved.
fn archive_generation(
    paired: &[(Vec<f64>, Evaluation)],
    front: &mut ParetoFront,
    meta_front: &mut ParetoFront,
    log: &RunLog,
) -> Result<bool, SearchError> {
    let mut rows = Vec::new();
    let mut meta_rows = Vec::new();
    let mut progress = false;

    for (individual, evaluation) in paired {
        if evaluation.failed() {
            continue;
        }
        let name = save_name(individual);

        if front.insert(FrontEntry::new(
            individual.clone(),
            evaluation.objectives.clone(),
        )) {
            rows.push(RunLog::stamp(&name, &evaluation.csv_row));
        }

        if meta_front.insert(FrontEntry::new(
            individual.clone(),
            evaluation.meta.to_vec(),
        )) {
            meta_rows.push(RunLog::stamp(&name, &evaluation.csv_row));
            progress = true;
        }
    }

    log.append(&rows)?;
    log.append_meta(&meta_rows)?;
    Ok(progress)
}

/// Run each experiment once at its template values.
///
/// Derives the per-experiment timeout (ten times the warm-up wall time,
/// floored at ten seconds) where the configuration gives none.
fn warm_up(target: &mut TargetStore, backend: &dyn SimulatorBackend) -> Result<(), SearchError> {
    use crate::compute::sim::SimulationRunner;

    let runner = SimulationRunner::new(backend);
    for experiment in &mut target.experiments {
        let started = Instant::now();
        runner
            .run(&experiment.template, &[], experiment.timeout())
            .map_err(|e| ConfigError::BadTemplate {
                experiment: experiment.name.clone(),
                reason: format!("warm-up simulation failed: {e}"),
            })?;
        let elapsed = started.elapsed();

        if experiment.timeout.is_none() {
            let derived = Duration::from_secs_f64((elapsed.as_secs_f64() * 10.0).max(10.0));
            log::info!(
                "experiment {}: warm-up took {:.2}s, timeout set to {:.0}s",
                experiment.name,
                elapsed.as_secs_f64(),
                derived.as_secs_f64()
            );
            experiment.timeout = Some(derived);
        }
    }
    Ok(())
}
