use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use policyqa_core::ParseReport;
use policyqa_rag::{
    build_embedder, format_answer, parse_documents, EmbeddingIndexer, IndexReport,
    PipelineConfig, QueryHit, QueryOutcome, QueryPipeline,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const PREVIEW_CHARS: usize = 200;

#[derive(Parser, Debug)]
#[command(name = "policyqa", version = VERSION, about = "Question answering over insurance policy documents")]
struct Cli {
    /// Config file (defaults to policyqa.toml or $POLICYQA_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(flatten)]
    paths: PathArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct PathArgs {
    #[arg(long = "docs-dir", global = true)]
    docs_dir: Option<PathBuf>,
    #[arg(long = "chunk-file", global = true)]
    chunk_file: Option<PathBuf>,
    #[arg(long = "vector-db", global = true)]
    vector_db_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    collection: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract chunks from the policy documents into the chunk file
    Parse,
    /// Rebuild the vector collection from the chunk file
    Index,
    /// Parse then index
    Process,
    /// Answer a single question
    Ask {
        question: String,
        /// Print the structured answer as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        quiet: bool,
    },
    /// Interactive question loop; `exit` or `quit` leaves
    Chat,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Parse => {
            let report = parse_documents(&config)?;
            print_parse_report(&config, &report);
        }
        Commands::Index => {
            let report = run_index(&config)?;
            print_index_report(&config, &report);
        }
        Commands::Process => {
            let parsed = parse_documents(&config)?;
            print_parse_report(&config, &parsed);
            let indexed = run_index(&config)?;
            print_index_report(&config, &indexed);
        }
        Commands::Ask {
            question,
            json,
            quiet,
        } => {
            let pipeline = QueryPipeline::from_config(Arc::new(config))?;
            let outcome = pipeline.run(&question)?;
            print_outcome(&outcome, json, quiet)?;
        }
        Commands::Chat => {
            let pipeline = QueryPipeline::from_config(Arc::new(config))?;
            run_chat(&pipeline)?;
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn resolve_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    let paths = &cli.paths;
    if let Some(dir) = &paths.docs_dir {
        config.docs_dir = dir.clone();
    }
    if let Some(file) = &paths.chunk_file {
        config.chunk_file = file.clone();
    }
    if let Some(dir) = &paths.vector_db_dir {
        config.vector_db_dir = dir.clone();
    }
    if let Some(name) = &paths.collection {
        config.collection_name = name.clone();
    }
    Ok(config)
}

fn run_index(config: &PipelineConfig) -> Result<IndexReport> {
    let embedder = build_embedder(config)?;
    Ok(EmbeddingIndexer::new(config, &embedder).run()?)
}

fn print_parse_report(config: &PipelineConfig, report: &ParseReport) {
    println!(
        "[policyqa] Parsed documents:  {} of {} ({} failed)",
        report.documents_parsed, report.documents_seen, report.documents_failed
    );
    println!(
        "[policyqa] Chunks written:    {} -> {}",
        report.chunks,
        config.chunk_file.display()
    );
}

fn print_index_report(config: &PipelineConfig, report: &IndexReport) {
    println!(
        "[policyqa] Collection:        {} ({})",
        config.collection_name,
        config.vector_db_dir.display()
    );
    println!(
        "[policyqa] Indexed chunks:    {} of {}",
        report.indexed, report.chunks
    );
    if report.failed_batches > 0 {
        println!(
            "[policyqa] Skipped batches:   {} of {}",
            report.failed_batches, report.batches
        );
    }
}

fn print_outcome(outcome: &QueryOutcome, json: bool, quiet: bool) -> Result<()> {
    match outcome {
        QueryOutcome::NoRelevantDocuments => {
            println!("[policyqa] No relevant documents found for this query.");
        }
        QueryOutcome::Answered { retrieved, answer } => {
            if !quiet {
                print_retrieved(retrieved);
            }
            if json {
                println!("{}", answer.to_json_pretty()?);
            } else {
                println!("\n{}", format_answer(answer));
            }
        }
    }
    Ok(())
}

fn print_retrieved(hits: &[QueryHit]) {
    println!("[policyqa] Context retrieved: {} chunks", hits.len());
    for (idx, hit) in hits.iter().enumerate() {
        println!(
            "  {}. {} #{} (distance {:.3}): {}",
            idx + 1,
            hit.metadata.doc_id,
            hit.metadata.index,
            hit.distance,
            preview(&hit.document)
        );
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out.replace('\n', " ")
}

fn is_exit_command(line: &str) -> bool {
    matches!(line.trim().to_lowercase().as_str(), "exit" | "quit")
}

fn run_chat(pipeline: &QueryPipeline) -> Result<()> {
    println!("[policyqa] Ask about your policy. Type 'exit' or 'quit' to leave.");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("\nquery> ");
        io::stdout().flush().context("failed to flush stdout")?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("failed to read from stdin")?;
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if is_exit_command(query) {
            break;
        }
        match pipeline.run(query) {
            Ok(outcome) => print_outcome(&outcome, false, false)?,
            Err(err) => {
                error!(error = %format!("{err:#}"), "query failed");
                println!("[policyqa] Error: {err}");
            }
        }
    }
    println!("[policyqa] Goodbye.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_path_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "policyqa",
            "ask",
            "Is knee surgery covered?",
            "--collection",
            "motor_docs",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.paths.collection.as_deref(), Some("motor_docs"));
        match cli.command {
            Commands::Ask { question, json, .. } => {
                assert_eq!(question, "Is knee surgery covered?");
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn exit_words_end_the_chat() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("  QUIT "));
        assert!(!is_exit_command("exit clause 4"));
    }

    #[test]
    fn previews_are_truncated_to_one_line() {
        let long = "a\nb".repeat(150);
        let text = preview(&long);
        assert!(text.ends_with("..."));
        assert!(!text.contains('\n'));
        assert_eq!(preview("short"), "short");
    }
}
