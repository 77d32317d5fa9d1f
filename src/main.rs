//! chromafit CLI - Run parameter estimation from JSON configuration.

use std::path::PathBuf;
use std::time::Instant;

use chromafit::compute::estimation::{SearchOrchestrator, StopReason};
use chromafit::compute::parallel::RayonMap;
use chromafit::compute::sim::ProcessBackend;
use chromafit::schema::MatchConfig;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <match.json>", args[0]);
        eprintln!();
        eprintln!("Estimate chromatography column parameters against measured data.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  match.json  Path to the estimation configuration file");
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);
    let config = MatchConfig::from_path(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(1);
    });

    let backend = ProcessBackend::new(
        config.simulator.command.clone(),
        config.simulator.args.clone(),
    );

    println!("chromafit parameter estimation");
    println!("==============================");
    println!("Strategy: {}", config.search.method);
    println!("Population: {}", config.search.population);
    println!("Generations: {}", config.search.generations);
    println!("Decision variables: {}", config.variable_count());
    println!("Experiments: {}", config.experiments.len());
    println!();

    let mut orchestrator = SearchOrchestrator::new(config, &backend, RayonMap)
        .unwrap_or_else(|e| {
            eprintln!("Error during setup: {e}");
            std::process::exit(1);
        });

    println!("Running search...");
    let start = Instant::now();

    let result = orchestrator.run().unwrap_or_else(|e| {
        eprintln!("Error during search: {e}");
        std::process::exit(1);
    });

    let elapsed = start.elapsed().as_secs_f64();

    println!();
    println!("Search finished in {elapsed:.1}s");
    println!(
        "  Stop reason: {}",
        match result.stop_reason {
            StopReason::MaxGenerations => "generation budget exhausted",
            StopReason::Stagnation => "no meta-front progress",
            StopReason::TargetReached => "target score reached",
            StopReason::SweepComplete => "multistart sweep complete",
        }
    );
    println!("  Generations: {}", result.generations);
    println!("  Evaluations: {}", result.evaluations);
    println!("  Best product-root score: {:.4}", result.best_product);
    println!("  Pareto front size: {}", result.front.len());
    println!("  Meta front size: {}", result.meta_front.len());

    if let Some(best) = result
        .meta_front
        .best_by(|objectives| objectives.first().copied().unwrap_or(f64::NEG_INFINITY))
    {
        println!();
        println!("Best candidate: {}", best.save_name);
        let (_, decoded) = orchestrator.context().decode(&best.individual);
        for (header, value) in orchestrator
            .context()
            .config
            .parameter_headers()
            .iter()
            .zip(decoded)
        {
            println!("  {header}: {value:.6e}");
        }
    }
}
