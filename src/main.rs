use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use image_batch::command::{Action, Command};
use image_batch::config::Settings;
use image_batch::error::PipelineError;
use image_batch::pipeline::{Pipeline, Transform};
use image_batch::session::SessionManager;
use image_batch::state::{OutcomePartition, Workspace};
use image_batch::transform::{collect_sources, export_document, Import, PdfImages};

/// Batch image transformations in a resumable working session.
///
/// After importing, reads commands from stdin, one per line, e.g.
/// `--action resize --width 800 --height 600`. `--exit` quits.
#[derive(Parser, Debug)]
#[command(name = "image-batch", version, about)]
struct Cli {
    /// Image files or directories to import
    images: Vec<PathBuf>,

    /// Resume an existing session instead of starting a fresh one
    #[arg(long)]
    session_id: Option<String>,

    /// Inputs are PDF files: import the JPEG images embedded in them
    #[arg(long)]
    pdf: bool,

    /// With --pdf, rasterise whole pages instead
    #[arg(long, requires = "pdf")]
    page_as_image: bool,

    /// With --page-as-image, render resolution (defaults to the configured dpi)
    #[arg(long, requires = "pdf")]
    dpi: Option<u32>,

    /// Settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the data directory that holds sessions
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }

    let manager = SessionManager::new(&settings.data_dir);
    let session = manager
        .open(cli.session_id.as_deref())
        .context("Failed to open session")?;
    println!("🗂️  Session {}", session.id());

    let mut workspace = if cli.session_id.is_some() {
        match session.load_workspace().context("Failed to load saved workspace")? {
            Some(workspace) => workspace,
            None => Workspace::new(session.scan_records().context("Failed to scan session images")?),
        }
    } else {
        Workspace::default()
    };
    if !workspace.batch.is_empty() {
        println!("📂 Resumed {} images", workspace.batch.len());
    }

    let pipeline = Pipeline::new(session, settings.executor_config());

    let imported = if cli.pdf {
        let transform = PdfImages {
            dpi: cli.dpi.unwrap_or(settings.default_dpi),
            page_as_image: cli.page_as_image,
        };
        pipeline.import(&cli.images, transform).await
    } else {
        pipeline.import(&collect_sources(&cli.images), Import).await
    };
    let imported = imported.context("Import failed")?;
    report("Imported", &imported);

    workspace.add_imported(imported);
    persist(&pipeline, &workspace);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        let command = match Command::parse(&line, settings.default_dpi) {
            Ok(command) => command,
            Err(e) => {
                println!("❌ {e}");
                continue;
            }
        };

        match command.action {
            Some(Ok(action)) => match run_action(&pipeline, &mut workspace, action).await {
                Ok(()) => persist(&pipeline, &workspace),
                Err(e) => {
                    // Workspace is left as it was before the command
                    error!(error = %e, "Batch aborted");
                    println!("💥 {e}");
                }
            },
            Some(Err(e)) => println!("❌ {e}"),
            None => {}
        }

        if command.clear_all {
            if manager.clear_temp().context("Failed to clear temp data")? {
                println!("🧹 Deleted temp folder");
            }
            workspace = Workspace::default();
            manager
                .resolve_working_dir(pipeline.session().id())
                .context("Failed to recreate session directory")?;
            persist(&pipeline, &workspace);
        }

        if command.exit {
            break;
        }
    }

    info!("Bye");
    Ok(())
}

async fn run_action(
    pipeline: &Pipeline,
    workspace: &mut Workspace,
    action: Action,
) -> Result<(), PipelineError> {
    match action {
        Action::Resize(t) => apply_transform(pipeline, workspace, "Resized", t).await,
        Action::EditBorder(t) => apply_transform(pipeline, workspace, "Borders edited", t).await,
        Action::ToJpeg(t) => apply_transform(pipeline, workspace, "Converted to JPEG", t).await,
        Action::ToAvif(t) => apply_transform(pipeline, workspace, "Converted to AVIF", t).await,
        Action::Denoise(t) => apply_transform(pipeline, workspace, "Noise removed", t).await,
        Action::GridSlice(t) => apply_transform(pipeline, workspace, "Grid sliced", t).await,
        Action::SaveImages(export) => {
            let partition = pipeline.run(&workspace.batch, export).await?;
            report("Saved", &partition);
            workspace.apply_export(partition);
            Ok(())
        }
        Action::ToDocument(format, params) => {
            let export = export_document(pipeline.executor(), &workspace.batch, format, &params).await?;
            match &export.path {
                Some(path) => println!("📄 Wrote {}", path.display()),
                None => println!("⚠️  No document written"),
            }
            report("Pages", &export.partition);
            workspace.apply_export(export.partition);
            Ok(())
        }
        Action::Revert => {
            let restored = workspace.revert();
            println!("↩️  Reverted to {restored} images");
            Ok(())
        }
        Action::Status => {
            println!("📊 {} images in batch, {} failed last time", workspace.batch.len(), workspace.failed.len());
            for record in &workspace.batch {
                println!("   {record}");
            }
            Ok(())
        }
        Action::History => {
            for record in &workspace.batch {
                let chain: Vec<String> = workspace
                    .lineage
                    .ancestry(&record.id)
                    .iter()
                    .map(|r| r.current_path.display().to_string())
                    .collect();
                println!("🧬 {}: {}", record.display_name(), chain.join(" <- "));
            }
            Ok(())
        }
    }
}

async fn apply_transform<T: Transform + 'static>(
    pipeline: &Pipeline,
    workspace: &mut Workspace,
    label: &str,
    transform: T,
) -> Result<(), PipelineError> {
    let partition = pipeline.run(&workspace.batch, transform).await?;
    report(label, &partition);
    workspace.apply(partition);
    Ok(())
}

/// Save the workspace so `--session-id` can pick it up later
fn persist(pipeline: &Pipeline, workspace: &Workspace) {
    if let Err(e) = pipeline.session().save_workspace(workspace) {
        warn!(error = %e, "Could not save workspace");
    }
}

fn report(label: &str, partition: &OutcomePartition) {
    println!(
        "✅ {label}: {} new, {} replaced, {} failed",
        partition.succeeded_new.len(),
        partition.superseded_old.len(),
        partition.failed.len()
    );
    for record in &partition.failed {
        if let Some(err) = record.error() {
            println!("   ❌ {} [{}]: {err}", record.display_name(), err.kind());
        }
    }
}
