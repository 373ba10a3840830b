use crate::cli::args::{Cli, Commands};
use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::processors::{PipelineDriver, RunReport};
use crate::readers::CsvRecordSource;
use crate::utils::progress::ProgressReporter;
use crate::writers::{ParquetSink, ParquetWriter};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub async fn run(cli: Cli) -> Result<()> {
    setup_logging(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Process {
            input,
            output_dir,
            config,
            compression,
            max_workers,
            chunk_size,
            percentile,
            accuracy,
        } => {
            let mut settings = PipelineConfig::load(config.as_deref())?.with_input(input);
            if let Some(dir) = output_dir {
                settings = settings.with_output_dir(&dir);
            }
            if let Some(compression) = compression {
                settings.compression = compression;
            }
            if let Some(workers) = max_workers {
                settings.max_workers = workers;
            }
            if let Some(size) = chunk_size {
                settings.chunk_size = size;
            }
            if let Some(p) = percentile {
                settings.percentile = p;
            }
            if let Some(eps) = accuracy {
                settings.accuracy = eps;
            }
            let settings = settings.validated()?;

            println!("Processing PM2.5 readings...");
            println!("Input file: {}", settings.input_path()?.display());
            println!(
                "Output directory: {}",
                output_directory(&settings.output.cleansed).display()
            );
            println!(
                "Workers: {}, Chunk size: {}",
                settings.max_workers, settings.chunk_size
            );

            let quiet = cli.quiet;
            let report = run_cancellable(move |cancel| {
                let progress = ProgressReporter::new_spinner("Processing readings...", quiet);
                let driver = PipelineDriver::from_config(&settings)?.with_cancel_flag(cancel);
                let source = CsvRecordSource::open(settings.input_path()?)?;
                let mut sink = ParquetSink::create(settings.parquet_writer()?, settings.output.clone())?;

                let report = driver.run(source, &mut sink, Some(&progress))?;
                progress.finish_with_message(&format!("Processed {} rows", report.rows_read));
                Ok(report)
            })
            .await?;

            println!("\n{}", report.generate_summary());

            let writer = ParquetWriter::new();
            for path in report
                .outputs
                .iter()
                .filter(|p| p.extension().is_some_and(|ext| ext == "parquet"))
            {
                let file_info = writer.get_file_info(path)?;
                println!("{}\n{}\n", path.display(), file_info.summary());
            }

            println!("Processing complete!");
        }

        Commands::Validate {
            input,
            config,
            max_workers,
        } => {
            let mut settings = PipelineConfig::load(config.as_deref())?.with_input(input);
            if let Some(workers) = max_workers {
                settings.max_workers = workers;
            }
            let settings = settings.validated()?;

            println!("Validating PM2.5 readings...");
            println!("Input file: {}", settings.input_path()?.display());

            let quiet = cli.quiet;
            let report = run_cancellable(move |cancel| {
                let progress = ProgressReporter::new_spinner("Validating readings...", quiet);
                let driver = PipelineDriver::from_config(&settings)?.with_cancel_flag(cancel);
                let source = CsvRecordSource::open(settings.input_path()?)?;

                let report = driver.scan(source, Some(&progress))?;
                progress.finish_with_message("Validation complete");
                Ok(report)
            })
            .await?;

            println!("\n{}", report.generate_summary());

            if report.rejected_total() == 0 {
                println!("✅ All rows passed validation checks");
            } else {
                println!("⚠️  {} rows would be dropped", report.rejected_total());
            }
        }

        Commands::Info { file, sample } => {
            println!("Analyzing Parquet file: {}", file.display());

            let writer = ParquetWriter::new();
            let file_info = writer.get_file_info(&file)?;

            println!("\nFile Details:");
            println!("{}", file_info.summary());

            if sample > 0 {
                println!("\nSample Records (showing up to {} records):", sample);
                println!("{}", file_info.columns.join(" | "));
                for (i, line) in sample_rows(&writer, &file, sample)?.iter().enumerate() {
                    println!("{}. {}", i + 1, line);
                }
            }
        }
    }

    Ok(())
}

/// Run a blocking pipeline job off the async runtime. Ctrl-C raises the
/// cancellation flag handed to the job.
async fn run_cancellable<F>(job: F) -> Result<RunReport>
where
    F: FnOnce(Arc<AtomicBool>) -> Result<RunReport> + Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));

    let watcher = {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current batch");
                cancel.store(true, Ordering::Relaxed);
            }
        })
    };

    let outcome = tokio::task::spawn_blocking(move || job(cancel)).await;
    watcher.abort();

    let report = outcome??;
    info!("Run finished in {:.2}s", report.elapsed_secs);
    Ok(report)
}

fn output_directory(cleansed: &Path) -> PathBuf {
    cleansed
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Render the first `limit` rows of a Parquet file, one line per row.
pub fn sample_rows(writer: &ParquetWriter, file: &Path, limit: usize) -> Result<Vec<String>> {
    let options = FormatOptions::default();
    let mut lines = Vec::new();

    for batch in writer.read_batches(file, limit)? {
        let formatters = batch
            .columns()
            .iter()
            .map(|column| ArrayFormatter::try_new(column.as_ref(), &options))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for row in 0..batch.num_rows() {
            let cells: Vec<String> = formatters.iter().map(|f| f.value(row).to_string()).collect();
            lines.push(cells.join(" | "));
        }
    }

    Ok(lines)
}

/// Set up structured logging on stderr, or to `log_file` when given.
pub fn setup_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("openaq_processor={}", log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    let initialized = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            registry
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_level(true)
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()
        }
        None => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_timer(fmt::time::uptime())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    initialized.map_err(|e| ProcessingError::Config(format!("Failed to initialize logging: {}", e)))?;

    debug!("Logging initialized at level: {}", log_level);
    Ok(())
}
