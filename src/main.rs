use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use pdf_table_server::pipeline::{
    Pipeline, PipelineError, Recovery, RunRequest, DEFAULT_TOOL_TIMEOUT_SECS,
};
use pdf_table_server::server::{self, AppState};

#[derive(Parser)]
#[command(
    name = "pdf_table_server",
    about = "PDF table extraction backend with safe page regeneration"
)]
struct Cli {
    /// Directory holding tables.json, config.json and run artifacts
    #[arg(long, default_value = "data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API for the review frontend
    Serve {
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
        /// Kill the extraction tool after this many seconds
        #[arg(long, default_value_t = DEFAULT_TOOL_TIMEOUT_SECS)]
        tool_timeout_secs: u64,
    },
    /// Re-run extraction for one or more pages
    Regenerate {
        /// Page numbers to regenerate, e.g. -p 3 5 7
        #[arg(short, long, required = true, num_args = 1..)]
        page: Vec<u32>,
        /// Pass --exclude-merge through to the extraction tool
        #[arg(long)]
        exclude_merge: bool,
        #[arg(long, default_value_t = DEFAULT_TOOL_TIMEOUT_SECS)]
        tool_timeout_secs: u64,
    },
    /// Show dataset statistics
    Stats,
    /// Handle a snapshot left behind by an interrupted run
    Recover {
        /// Write the snapshot back over the dataset, then clear the slot
        #[arg(long)]
        restore: bool,
        /// Drop the snapshot, keeping the dataset as-is
        #[arg(long)]
        discard: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            tool_timeout_secs,
        } => {
            let pipeline = Pipeline::new(&cli.data_dir, Duration::from_secs(tool_timeout_secs));
            if pipeline.snapshot_pending() {
                eprintln!(
                    "warning: a snapshot from an earlier interrupted run is pending; \
                     regeneration will be refused until `recover` is run"
                );
            }
            server::serve(
                AppState {
                    pipeline: Arc::new(pipeline),
                },
                port,
            )
            .await
        }
        Commands::Regenerate {
            page,
            exclude_merge,
            tool_timeout_secs,
        } => {
            let pipeline = Pipeline::new(&cli.data_dir, Duration::from_secs(tool_timeout_secs));
            regenerate_pages(&pipeline, &page, exclude_merge).await
        }
        Commands::Stats => {
            let pipeline = Pipeline::new(&cli.data_dir, Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS));
            match pipeline.summary().await? {
                None => println!("No dataset yet. Run 'regenerate' or save tables first."),
                Some(s) => {
                    println!("Tables:     {}", s.total_tables);
                    println!(
                        "Last write: {}",
                        s.timestamp.as_deref().unwrap_or("(unknown)")
                    );
                    println!(
                        "Snapshot:   {}",
                        if s.snapshot_pending {
                            "pending (run `recover`)"
                        } else {
                            "clear"
                        }
                    );
                    if !s.pages.is_empty() || s.untagged > 0 {
                        println!("Per page:");
                        for (page, count) in &s.pages {
                            println!("  page {:>4}: {}", page, count);
                        }
                        if s.untagged > 0 {
                            println!("  untagged:  {}", s.untagged);
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Recover { restore, discard } => {
            if restore == discard {
                bail!("pass exactly one of --restore or --discard");
            }
            let pipeline = Pipeline::new(&cli.data_dir, Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS));
            let mode = if restore {
                Recovery::Restore
            } else {
                Recovery::Discard
            };
            if pipeline.recover(mode).await? {
                println!(
                    "{}",
                    if restore {
                        "Snapshot restored over dataset; slot cleared."
                    } else {
                        "Snapshot discarded; slot cleared."
                    }
                );
            } else {
                println!("Backup slot is empty; nothing to recover.");
            }
            Ok(())
        }
    }
}

/// Run the pipeline once per page, in order. Stops at the first failure:
/// after a failed run the snapshot stays in the slot and every later page
/// would be refused anyway.
async fn regenerate_pages(
    pipeline: &Pipeline,
    pages: &[u32],
    exclude_merge: bool,
) -> anyhow::Result<()> {
    let pb = if pages.len() > 1 {
        let pb = ProgressBar::new(pages.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} page {msg}")?
                .progress_chars("=> "),
        );
        Some(pb)
    } else {
        None
    };

    for &page in pages {
        if let Some(pb) = &pb {
            pb.set_message(page.to_string());
        }
        let request = RunRequest {
            page,
            exclude_merge,
        };
        match pipeline.regenerate(request).await {
            Ok(report) => {
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
                println!("page {}: {}", page, report.message());
            }
            Err(err) => {
                if let Some(pb) = &pb {
                    pb.finish_and_clear();
                }
                if let PipelineError::Tool { stderr, .. } = &err {
                    if !stderr.is_empty() {
                        eprintln!("--- tool stderr ---\n{}", stderr.trim_end());
                    }
                }
                bail!("page {page}: {err}");
            }
        }
    }
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }
    Ok(())
}
