use anyhow::{Context, bail};
use busco_batch::aggregate::aggregate;
use busco_batch::batch::{ChunkRequest, run_chunk};
use busco_batch::config::PipelineConfig;
use busco_batch::discovery::{HttpPageSource, discover_catalog};
use busco_batch::executor::{UnitExecutor, UnitOutcome};
use busco_batch::pending::pending_from_paths;
use busco_batch::planner::{DEFAULT_MAX_CHUNKS, PlanLimits, plan_trigger};
use busco_batch::protocol::{MatrixPlan, Unit};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "busco_batch", version, about = "Resumable BUSCO batch runs over a genome annotation catalog")]
struct Cli {
    /// Pipeline configuration (JSON)
    #[arg(long, global = true, env = "BUSCO_BATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the annotation catalog from the annotations and assemblies APIs
    FetchCatalog {
        #[arg(long, default_value = "annotations.tsv")]
        output: PathBuf,
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Compute the pending set and the chunk matrix for this trigger
    Plan {
        catalog: PathBuf,
        log: PathBuf,
        #[arg(long, env = "BUSCO_BATCH_MAX_CHUNKS", default_value_t = DEFAULT_MAX_CHUNKS)]
        max_chunks: usize,
        #[arg(long, env = "BUSCO_BATCH_MAX_PER_JOB")]
        max_per_job: Option<usize>,
        /// Print the plan as JSON instead of key=value lines
        #[arg(long)]
        json: bool,
    },
    /// Process one chunk of the pending set
    RunChunk {
        catalog: PathBuf,
        log: PathBuf,
        chunk_index: usize,
        chunk_count: usize,
        output_dir: PathBuf,
        #[arg(long, env = "BUSCO_BATCH_MAX_PER_JOB")]
        max_per_job: Option<usize>,
    },
    /// Process a single annotation
    RunUnit {
        annotation_url: String,
        assembly_url: String,
        annotation_id: String,
        output_dir: PathBuf,
    },
    /// Merge fragments into the result and log ledgers
    Aggregate {
        artifacts_dir: PathBuf,
        result_tsv: PathBuf,
        log_tsv: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn matrix_lines(plan: &MatrixPlan) -> Vec<String> {
    vec![
        format!("matrix={}", plan.matrix_json()),
        format!("chunk_count={}", plan.chunk_count),
        format!("pending_count={}", plan.pending_count),
    ]
}

/// Appends to `$GITHUB_OUTPUT` when running under Actions, else prints.
fn emit_outputs(lines: &[String]) -> anyhow::Result<()> {
    match std::env::var_os("GITHUB_OUTPUT") {
        Some(path) => {
            let path = Path::new(&path);
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Could not open '{}'", path.display()))?;
            for line in lines {
                writeln!(file, "{line}")
                    .with_context(|| format!("Could not write '{}'", path.display()))?;
            }
        }
        None => {
            for line in lines {
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::FetchCatalog { output, page_size } => {
            let mut discovery = config.discovery.clone();
            if let Some(page_size) = page_size {
                discovery.page_size = page_size;
            }
            let source = HttpPageSource::new(config.http_timeout())?;
            let discovered = discover_catalog(&source, &discovery)?;
            discovered.catalog.write(&output)?;
            tracing::info!(
                "Wrote {} annotations to '{}'",
                discovered.catalog.len(),
                output.display()
            );
        }
        Command::Plan {
            catalog,
            log,
            max_chunks,
            max_per_job,
            json,
        } => {
            let limits = PlanLimits::new(max_chunks, max_per_job)?;
            let (_, pending) = pending_from_paths(&catalog, &log)?;
            let plan = plan_trigger(&pending, &limits);
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                emit_outputs(&matrix_lines(&plan))?;
            }
        }
        Command::RunChunk {
            catalog,
            log,
            chunk_index,
            chunk_count,
            output_dir,
            max_per_job,
        } => {
            let executor = UnitExecutor::from_config(&config);
            let report = run_chunk(
                &ChunkRequest {
                    catalog_path: catalog,
                    log_path: log,
                    chunk_index,
                    chunk_count,
                    output_dir,
                    max_per_job,
                },
                &executor,
            )?;
            println!("{}", serde_json::to_string(&report)?);
        }
        Command::RunUnit {
            annotation_url,
            assembly_url,
            annotation_id,
            output_dir,
        } => {
            let executor = UnitExecutor::from_config(&config);
            let unit = Unit {
                id: annotation_id,
                annotation_url,
                assembly_url,
            };
            let report = executor.execute_to_fragments(&unit, &output_dir)?;
            match report.outcome {
                UnitOutcome::Success(record) => {
                    println!("{}", serde_json::to_string(&record)?);
                }
                UnitOutcome::Failed(error) => {
                    bail!("{} failed at {}: {}", unit.id, error.step, error.message);
                }
            }
        }
        Command::Aggregate {
            artifacts_dir,
            result_tsv,
            log_tsv,
        } => {
            let report = aggregate(&artifacts_dir, &result_tsv, &log_tsv)?;
            println!("{}", serde_json::to_string(&report)?);
        }
    }
    Ok(())
}

fn main() {
    init_tracing();
    if let Err(e) = run() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_chunk_positionals() {
        let cli = Cli::parse_from([
            "busco_batch",
            "run-chunk",
            "annotations.tsv",
            "log.tsv",
            "3",
            "16",
            "out",
            "--max-per-job",
            "5",
        ]);
        let Command::RunChunk {
            chunk_index,
            chunk_count,
            max_per_job,
            ..
        } = cli.command
        else {
            panic!("expected run-chunk");
        };
        assert_eq!((chunk_index, chunk_count, max_per_job), (3, 16, Some(5)));
    }

    #[test]
    fn plan_lines_match_matrix_surface() {
        let plan = MatrixPlan {
            chunk_count: 2,
            chunk_indices: vec![0, 1],
            pending_count: 7,
            scheduled_count: 7,
            deferred_count: 0,
        };
        assert_eq!(
            matrix_lines(&plan),
            vec!["matrix=[0,1]", "chunk_count=2", "pending_count=7"]
        );
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::parse_from(["busco_batch", "aggregate", "a", "r.tsv", "l.tsv", "--config", "c.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("c.json")));
    }
}
