//! # Casefile CLI (`casefile`)
//!
//! Ask the detective questions about the evidence folder.
//!
//! ## Usage
//!
//! ```bash
//! casefile --config ./config/casefile.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `casefile ask "<question>"` | Answer one question with cited sources |
//! | `casefile chat` | Interactive interrogation with conversation history |
//! | `casefile ingest <path>...` | File evidence into the evidence folder |
//! | `casefile remove <filename>` | Remove a file from the evidence folder |
//! | `casefile list` | List indexed evidence files |
//! | `casefile read <filename>` | Print an evidence file's text |
//! | `casefile tips` | Suggested lines of questioning |
//!
//! The index lives in memory: every command that needs it loads the
//! evidence folder (`[evidence].dir`) at startup.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use casefile::config::{self, Config};
use casefile::engine::{Engine, LoadSummary, QueryAnswer, INVESTIGATION_TIPS};
use casefile::extract::extract_evidence;
use casefile::logging;
use casefile::EngineError;
use casefile_core::models::ConversationTurn;

/// Casefile: evidence-grounded answers for cold case files.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "casefile",
    about = "Casefile: ask a cold case detective about your evidence, with citations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/casefile.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question about the evidence.
    Ask {
        question: String,

        /// Print the answer and sources as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Interactive session; earlier turns are passed along as context.
    Chat,

    /// Validate evidence files and copy them into the evidence folder.
    ///
    /// PDFs are stored as their extracted text under a `.txt` name.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Remove a file from the evidence folder.
    Remove { filename: String },

    /// List indexed evidence files.
    List,

    /// Print the text of an evidence file.
    Read { filename: String },

    /// Suggested questions to get an investigation started.
    Tips,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Tips = cli.command {
        print_tips();
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging);

    match cli.command {
        Commands::Ask { question, json } => {
            let engine = open_engine(&cfg).await?;
            let answer = engine.query(&question, &[]).await.map_err(user_error)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print_answer(&answer);
            }
        }
        Commands::Chat => {
            let engine = open_engine(&cfg).await?;
            run_chat(&engine).await?;
        }
        Commands::Ingest { paths } => {
            let engine = open_engine(&cfg).await?;
            for path in paths {
                ingest_path(&engine, &cfg.evidence.dir, &path).await?;
            }
        }
        Commands::Remove { filename } => {
            let (engine, summary) = load_engine(&cfg).await?;
            engine.remove(&filename).await.map_err(user_error)?;
            let path = summary
                .source_path(&filename)
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cfg.evidence.dir.join(&filename));
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete {}", path.display()))?;
            println!("Removed {}", filename);
        }
        Commands::List => {
            let engine = open_engine(&cfg).await?;
            let files = engine.list_indexed();
            if files.is_empty() {
                println!("No evidence on file.");
            }
            for f in files {
                println!("{}", f);
            }
        }
        Commands::Read { filename } => {
            let engine = open_engine(&cfg).await?;
            let text = engine.read_evidence(&filename).map_err(user_error)?;
            println!("{}", text);
        }
        Commands::Tips => unreachable!("handled before config loading"),
    }

    Ok(())
}

async fn open_engine(cfg: &Config) -> Result<Engine> {
    Ok(load_engine(cfg).await?.0)
}

async fn load_engine(cfg: &Config) -> Result<(Engine, LoadSummary)> {
    let engine = Engine::from_config(cfg)?;
    let summary = engine.load_evidence_dir(&cfg.evidence.dir).await?;
    for (path, e) in &summary.failed {
        eprintln!("warning: {}: {}", path.display(), e.user_message());
    }
    Ok((engine, summary))
}

fn user_error(e: EngineError) -> anyhow::Error {
    warn!(error = %e, transient = e.is_transient(), "request failed");
    anyhow!(e.user_message())
}

async fn ingest_path(engine: &Engine, evidence_dir: &Path, path: &Path) -> Result<()> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid file name: {}", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let evidence = extract_evidence(name, &bytes).map_err(user_error)?;
    let report = engine
        .ingest(&evidence.filename, evidence.text.as_bytes())
        .await
        .map_err(user_error)?;

    let target = evidence_dir.join(&evidence.filename);
    std::fs::write(&target, evidence.text.as_bytes())
        .with_context(|| format!("Failed to write {}", target.display()))?;

    println!(
        "Filed {} as {} ({} chunks)",
        path.display(),
        report.filename,
        report.chunks
    );
    Ok(())
}

async fn run_chat(engine: &Engine) -> Result<()> {
    println!("Cold case detective on duty. Type 'help' for commands, 'quit' to leave.");
    let files = engine.list_indexed();
    println!("{} evidence file(s) on record.", files.len());

    let mut history: Vec<ConversationTurn> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("\nDetective> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input.to_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" | "q" => break,
            "help" => {
                print_help();
                continue;
            }
            "tips" => {
                print_tips();
                continue;
            }
            "files" => {
                for f in engine.list_indexed() {
                    println!("  {}", f);
                }
                continue;
            }
            _ => {}
        }

        match engine.query(input, &history).await {
            Ok(answer) => {
                print_answer(&answer);
                history.push(ConversationTurn::user(input));
                history.push(ConversationTurn::assistant(
                    answer.answer.clone(),
                    answer.sources.clone(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "query failed");
                println!("{}", e.user_message());
            }
        }
    }

    println!("Case closed for now.");
    Ok(())
}

fn print_answer(answer: &QueryAnswer) {
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!("\nSources:");
        for s in &answer.sources {
            println!("  [{}] {}", s.filename, s.excerpt.replace('\n', " "));
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  help   show this message");
    println!("  tips   suggested questions");
    println!("  files  list evidence on record");
    println!("  quit   end the session");
    println!("Anything else is a question for the detective.");
}

fn print_tips() {
    for tip in INVESTIGATION_TIPS {
        println!("{}:\n  {}", tip.text, tip.query);
    }
}
