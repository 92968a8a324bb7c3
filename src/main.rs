use std::io::BufWriter;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, info_span};

use blockpipe::{
    cli::{self, Mode},
    config,
    device::{self, AccessMode, BlockDevice},
    logging::{self, LogConfig},
    pipeline::{self, TransferOptions, progress::StatusLineReporter},
};

fn main() -> Result<()> {
    let cli_opts = cli::parse();
    logging::init_logging(LogConfig {
        json: cli_opts.log_json,
        verbose: cli_opts.verbose,
    });

    let loaded = config::load_config(cli_opts.config_path.as_deref())?;
    let cfg = loaded.config;
    let opts = apply_overrides(cfg.transfer_options(), &cli_opts);

    let span = info_span!(
        "transfer",
        run_id = %cfg.run_id,
        mode = ?cli_opts.mode,
        device = %cli_opts.device.display()
    );
    let _guard = span.enter();

    info!(
        "starting config_hash={} block_size={} workers={} sync_on_finish={}",
        loaded.config_hash, opts.block_size, opts.workers, opts.sync_on_finish
    );

    run(&cli_opts, &opts)
}

fn run(cli_opts: &cli::CliOptions, opts: &TransferOptions) -> Result<()> {
    let access = match cli_opts.mode {
        Mode::Read => AccessMode::Read,
        Mode::Write => AccessMode::Write,
    };
    let device = device::open_device(&cli_opts.device, access)
        .with_context(|| format!("opening {}", cli_opts.device.display()))?;
    let device: Arc<dyn BlockDevice> = Arc::from(device);
    let reporter = Arc::new(StatusLineReporter::stderr());

    let stats = match cli_opts.mode {
        Mode::Read => {
            let capacity = usize::try_from(device.len())
                .map_or(opts.block_size, |len| len.min(opts.block_size));
            let stdout = std::io::stdout();
            let mut output = BufWriter::with_capacity(capacity, stdout.lock());
            pipeline::read_device(device, &mut output, opts, reporter)?
        }
        Mode::Write => pipeline::write_device(device, std::io::stdin(), opts, reporter)?,
    };

    info!(
        "transfer finished bytes={} chunks={} throughput_mib={:.2}",
        stats.bytes_transferred, stats.chunks, stats.throughput_mib
    );
    Ok(())
}

/// CLI flags take precedence over the config file.
fn apply_overrides(mut opts: TransferOptions, cli_opts: &cli::CliOptions) -> TransferOptions {
    if let Some(block_size) = cli_opts.block_size {
        opts.block_size = block_size;
    }
    if let Some(workers) = cli_opts.workers {
        opts.workers = workers;
    }
    if let Some(ms) = cli_opts.progress_interval_ms {
        opts.progress_interval = Duration::from_millis(ms);
    }
    if cli_opts.no_sync {
        opts.sync_on_finish = false;
    }
    opts
}
