mod config;
mod server;

use chrono::Utc;
use clap::{Parser, Subcommand};
use config::{Purpose, Settings};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version, about = "Ask questions answered from uploaded PDF documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve,
    /// Ingest one PDF, or every PDF found recursively in a folder.
    Ingest {
        /// PDF file or folder
        path: PathBuf,
    },
    /// Answer a question from the indexed documents.
    Ask {
        question: String,
        /// Passages to retrieve for this question (capped at 10).
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// List ingested documents.
    Documents,
    /// Show recent questions, oldest first.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    let purpose = match cli.command {
        Command::Serve | Command::Ask { .. } => Purpose::Answering,
        Command::Ingest { .. } | Command::Documents | Command::History { .. } => Purpose::Indexing,
    };
    let knowledge = cli.settings.build_knowledge_base(purpose).await?;

    match cli.command {
        Command::Serve => {
            server::run_server(knowledge, &cli.settings.bind, cli.settings.max_file_size).await?;
        }
        Command::Ingest { path } => {
            let report = knowledge.ingest_path(&path).await?;

            if !report.skipped_files.is_empty() {
                warn!(
                    "skipped_files={} for path={}",
                    report.skipped_files.len(),
                    path.display()
                );
                for skipped in &report.skipped_files {
                    println!("skipped {}: {}", skipped.path.display(), skipped.reason);
                }
            }

            for document in &report.documents {
                println!(
                    "{} id={} chunks={} sha256={}",
                    document.filename, document.id, document.chunk_count, document.checksum
                );
            }
            println!(
                "{} document(s) ingested at {}",
                report.documents.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Ask { question, top_k } => {
            let answer = knowledge.ask(&question, top_k).await?;

            println!("question: {}", answer.question);
            println!("answer:\n{}", answer.answer);
            for (rank, source) in answer.sources.iter().enumerate() {
                println!(
                    "[{}] score={:.4} document_id={} chunk={}",
                    rank + 1,
                    source.similarity_score,
                    source.document_id,
                    source.chunk_index
                );
                println!("  {}", source.text);
            }
            println!("processing_time={:.2}s", answer.processing_time);
        }
        Command::Documents => {
            let documents = knowledge.documents().await;
            if documents.is_empty() {
                println!("no documents ingested");
            }
            for document in documents {
                println!(
                    "{} {} size={} chunks={} uploaded={}",
                    document.id,
                    document.filename,
                    document.size_bytes,
                    document.chunk_count,
                    document.uploaded_at.to_rfc3339()
                );
            }
        }
        Command::History { limit } => {
            for record in knowledge.history(limit).await {
                println!(
                    "[{:.0}] {} ({} sources, {:.2}s)",
                    record.timestamp,
                    record.question,
                    record.sources.len(),
                    record.processing_time
                );
                println!("  {}", record.answer);
            }
            println!("total={}", knowledge.history_total().await);
        }
    }

    Ok(())
}
