use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use roadscan::models::{BatchProcessingResult, ProcessingResult};
use roadscan::watch::Watcher;
use roadscan::{AnalysisSummary, Config, ImageProcessor, ProcessOptions};

#[derive(Parser)]
#[command(name = "roadscan")]
#[command(about = "Detect potholes in road photos and file incident reports")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "ROADSCAN_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Do not submit reports
    #[arg(long, global = true)]
    no_report: bool,

    /// Leave source images in place
    #[arg(long, global = true)]
    no_move: bool,

    /// Skip writing annotated images
    #[arg(long, global = true)]
    no_annotate: bool,

    /// Save heuristic stage images under this directory
    #[arg(long, global = true, value_name = "DIR")]
    debug_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every image in a directory (defaults to the configured incoming directory)
    Batch {
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },
    /// Run the full pipeline on one image
    Process {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },
    /// Detect and describe potholes in one image without reporting
    Analyze {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },
    /// Poll the incoming directory and process new images
    Watch {
        /// Poll once and exit
        #[arg(long)]
        once: bool,
    },
}

impl Cli {
    fn options(&self) -> ProcessOptions {
        ProcessOptions {
            create_report: !self.no_report,
            move_after: !self.no_move,
            annotate: !self.no_annotate,
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "roadscan=debug" } else { "roadscan=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let processor = ImageProcessor::from_config(&config, cli.debug_out.clone())?;
    let options = cli.options();

    match &cli.command {
        Command::Batch { dir } => {
            let dir = dir.clone().unwrap_or_else(|| config.paths.incoming.clone());
            let (batch, summary) = processor.run_batch(&dir, options)?;
            print_batch(&batch, summary.as_deref());
        }
        Command::Process { image } => {
            let result = processor.process(image, options);
            print_result(&result);
            if !result.success {
                anyhow::bail!(
                    "processing {} failed: {}",
                    image.display(),
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Command::Analyze { image, json } => {
            let summary = processor.analyze(image)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_analysis(&summary);
            }
        }
        Command::Watch { once } => {
            let (tx, rx) = mpsc::channel();
            ctrlc::set_handler(move || {
                let _ = tx.send(());
            })
            .context("error setting Ctrl-C handler")?;

            let stats = Watcher::new(&processor, &config.watch, options).run(&rx, *once);
            println!(
                "Watch stopped after {} poll(s): {} batch(es), {} image(s), {} failure(s)",
                stats.polls, stats.batches, stats.images, stats.failures
            );
        }
    }

    Ok(())
}

fn print_result(result: &ProcessingResult) {
    let status = if result.success { "ok" } else { "FAILED" };
    print!("{} [{}]", result.image_path.display(), status);
    if let Some(detection) = &result.detection {
        print!(
            " {} pothole(s) via {}",
            detection.num_potholes(),
            detection.method.as_str()
        );
        if let Some(severity) = detection.max_severity() {
            print!(", max severity {}", severity);
        }
    }
    if let Some(error) = &result.error {
        print!(" - {}", error);
    }
    println!();

    if let Some(report) = &result.report {
        match (&report.report_id, &report.error) {
            (_, Some(error)) => println!("  report not created: {}", error),
            (Some(id), None) => println!("  report created: {}", id),
            (None, None) => println!("  report created"),
        }
    }
    if let Some(path) = result.detection.as_ref().and_then(|d| d.annotated_image_path.as_ref()) {
        println!("  annotated: {}", path.display());
    }
}

fn print_batch(batch: &BatchProcessingResult, summary: Option<&Path>) {
    for result in &batch.results {
        print_result(result);
    }
    println!("\n=== Batch Results ===");
    println!("Directory:       {}", batch.directory.display());
    println!("Images:          {}", batch.total);
    println!("Successful:      {}", batch.successful);
    println!("Failed:          {}", batch.failed);
    println!("Potholes:        {}", batch.total_potholes);
    println!("Reports created: {}", batch.reports_created);
    println!("Elapsed:         {:.1}s", batch.elapsed.as_secs_f64());
    if let Some(path) = summary {
        println!("Summary:         {}", path.display());
    }
}

fn print_analysis(summary: &AnalysisSummary) {
    println!("Potholes: {}", summary.num_potholes);
    if let Some(severity) = summary.severity {
        println!("Severity: {}", severity);
    }
    println!("Method:   {}", summary.method.as_str());
    println!("GPS:      {}", if summary.has_gps { "yes" } else { "no" });
    println!("\n{}", summary.description_en);
    println!("{}", summary.description_ar);
    if let (Some(en), Some(ar)) = (&summary.note_en, &summary.note_ar) {
        println!("\n{}\n{}", en, ar);
    }
}
