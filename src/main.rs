use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use arbiter::config::CliArgs;
use arbiter::engine::Engine;
use arbiter::model::{Contestant, Problem, SubmissionResult};
use arbiter::observer::LogObserver;
use arbiter::scan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_level));

    let settings = cli.load_settings().context("failed to load settings")?;
    let threads = settings.thread_count.max(1);

    let problems = scan::scan_problems(&cli.problems_dir)?;
    let contestants = scan::scan_contestants(&cli.contestants_dir, &problems)?;
    log::info!(
        "found {} contestants and {} problems",
        contestants.len(),
        problems.len()
    );

    let problems: Vec<Arc<Problem>> = problems.into_iter().map(Arc::new).collect();
    let contestants: Vec<Arc<Contestant>> = contestants.into_iter().map(Arc::new).collect();

    let engine = Arc::new(Engine::new(settings));
    let observer = Arc::new(LogObserver);
    let results = engine
        .evaluate_all(&contestants, &problems, observer, !cli.sequential, threads)
        .await;

    print_score_table(&contestants, &problems, &results);

    if let Some(path) = &cli.report {
        write_report(path, &results)?;
        log::info!("report written to {}", path.display());
    }

    Ok(())
}

fn print_score_table(
    contestants: &[Arc<Contestant>],
    problems: &[Arc<Problem>],
    results: &HashMap<(String, String), SubmissionResult>,
) {
    print!("{:<16}", "contestant");
    for problem in problems {
        print!("{:>12}", problem.id);
    }
    println!("{:>12}", "total");

    for contestant in contestants {
        print!("{:<16}", contestant.id);
        let mut total = 0.0;
        for problem in problems {
            match results.get(&(contestant.id.clone(), problem.id.clone())) {
                Some(result) => {
                    total += result.score;
                    print!("{:>12.1}", result.score);
                }
                None => print!("{:>12}", "-"),
            }
        }
        println!("{total:>12.1}");
    }
}

fn write_report(
    path: &std::path::Path,
    results: &HashMap<(String, String), SubmissionResult>,
) -> anyhow::Result<()> {
    let mut sorted: Vec<&SubmissionResult> = results.values().collect();
    sorted.sort_by(|a, b| {
        (&a.contestant_id, &a.problem_id).cmp(&(&b.contestant_id, &b.problem_id))
    });
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating report {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), &sorted)?;
    Ok(())
}
