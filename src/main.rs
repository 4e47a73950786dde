/*!
 * Command-line interface for repoprompt
 */

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{CommandFactory, Parser};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::ThreadPoolBuilder;

use repoprompt::config::{Args, Config, Settings};
use repoprompt::error::{Result, ResultExt};
use repoprompt::output::{ClipboardSink, FileSink, OutputSink};
use repoprompt::report::{Reporter, RunReport};
use repoprompt::{SelectionAggregator, XmlSerializer};

fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(shell) = args.generate {
        clap_complete::generate(shell, &mut Args::command(), "repoprompt", &mut io::stdout());
        return ExitCode::SUCCESS;
    }

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(Env::default().filter_or("REPOPROMPT_LOG", level)).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            log::error!("{:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let settings = Settings::discover(args.settings.as_deref())?;
    let mut config = Config::from_args(args, settings)?;
    config.validate()?;

    let output_file = config.resolve_output()?;
    config.options.excluded_outputs.push(output_file.clone());
    let effective = serde_json::to_string(&config.options).with_context(|| "encoding options")?;
    debug!("Effective options: {}", effective);

    if let Err(e) = ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build_global()
    {
        warn!("Failed to set thread pool size: {}", e);
    }

    let progress = ProgressBar::new(100);
    progress.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} {prefix:.bold.cyan} {wide_msg:.dim.white} ({pos}%) ⏱️  {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress.set_prefix("📊 Processing");

    let start_time = Instant::now();

    let aggregator = SelectionAggregator::new(config.options.clone())
        .with_progress(Arc::new(progress.clone()))
        .with_concurrency(config.num_threads);
    let result = aggregator.process(&config.selection, config.prompt.take());

    progress.set_prefix("📝 Writing");
    let outcome = result.and_then(|result| {
        let chunks = XmlSerializer::from_options(&config.options)
            .serialize(&result, config.options.chunk_size)?;
        let mut outputs = FileSink::new(&output_file).write_chunks(&chunks)?;

        if config.clip {
            match ClipboardSink.write_chunks(&chunks) {
                Ok(copied) => outputs.extend(copied),
                Err(e) => warn!("Could not copy to clipboard: {}", e),
            }
        }

        Ok((result, chunks, outputs))
    });
    progress.finish_and_clear();

    let (result, chunks, outputs) = outcome?;
    for item in &result.skipped {
        debug!("Skipped {}: {}", item.path.display(), item.reason);
    }
    info!("Done in {:.2?}", start_time.elapsed());

    let report = RunReport::new(&result, &chunks, outputs, start_time.elapsed());
    Reporter::new().print_report(&report);

    Ok(())
}
