use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use skywatch::ingest::{PipelineConfig, CHECKPOINT_INTERVAL_REPLAY};
use skywatch::los::{LogOnlySink, LosTracker};
use skywatch::regions::RegionSet;
use skywatch::rules::config::RulesFile;
use skywatch::{Pipeline, Resampler, ResamplerConfig};

#[derive(Parser)]
#[command(name = "skywatch", about = "ADS-B stream rule engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a live readsb-style JSON feed over TCP
    Run {
        /// Feed host
        #[arg(long)]
        host: String,
        /// Feed port
        #[arg(long)]
        port: u16,
        /// Rules file (YAML)
        #[arg(long)]
        rules: PathBuf,
        /// Region layer files (JSON), one layer each, in addition to any
        /// listed in the rules file
        #[arg(long = "regions")]
        regions: Vec<PathBuf>,
        /// Give up instead of reconnecting on stream errors
        #[arg(long)]
        no_retry: bool,
        /// Expose Prometheus metrics on this address
        #[arg(long)]
        metrics_addr: Option<SocketAddr>,
    },
    /// Replay a sorted JSONL capture (gzip or plain)
    Replay {
        /// Capture file
        #[arg(long)]
        input: PathBuf,
        /// Rules file (YAML)
        #[arg(long)]
        rules: PathBuf,
        /// Region layer files (JSON)
        #[arg(long = "regions")]
        regions: Vec<PathBuf>,
        /// Shadow positions into the resampler and run the post-hoc
        /// proximity analysis at end of input
        #[arg(long)]
        resample: bool,
        /// Sample interval for the post-hoc proximity sweep, seconds
        #[arg(long, default_value_t = 1)]
        prox_interval: i64,
    },
}

fn load_layers(rules: &RulesFile, extra: &[PathBuf]) -> Result<Vec<RegionSet>> {
    let mut layers = Vec::new();
    for path in rules.config.region_layers.iter().chain(extra.iter()) {
        layers.push(RegionSet::from_json_file(path)?);
    }
    if layers.is_empty() {
        warn!("no region layers configured; region conditions will never match");
    }
    Ok(layers)
}

/// Wire a LOS tracker in as the pair callback for proximity rules. The
/// handler is registered as "los_update"; rules using other callback names
/// need an embedding application that registers its own.
fn attach_los_tracker(pipeline: &Pipeline) -> Arc<LosTracker> {
    let tracker = Arc::new(LosTracker::new(
        Box::new(LogOnlySink),
        Arc::clone(pipeline.stats()),
    ));
    let for_callback = Arc::clone(&tracker);
    pipeline.register_pair_callback("los_update", move |f1, f2| {
        for_callback.los_update(f1, f2);
    });
    tracker
}

#[tokio::main]
async fn main() -> Result<()> {
    skywatch::telemetry::init_tracing();
    let cli = Cli::parse();

    let result: Result<()> = match cli.command {
        Command::Run {
            host,
            port,
            rules,
            regions,
            no_retry,
            metrics_addr,
        } => {
            if let Some(addr) = metrics_addr {
                skywatch::telemetry::install_metrics_exporter(addr)?;
            }
            let rules = RulesFile::from_file(&rules)?;
            let layers = load_layers(&rules, &regions)?;

            let pipeline = Pipeline::new(rules, layers);
            let tracker = attach_los_tracker(&pipeline);
            let gc_quit = Arc::clone(&tracker).start_gc_task();

            pipeline.run_network(&host, port, !no_retry).await?;

            // Final sweep so events open at shutdown still get finalized.
            let _ = gc_quit.send(()).await;
            tracker.gc(f64::MAX);
            pipeline.engine().report_rule_counts();
            Ok(())
        }
        Command::Replay {
            input,
            rules,
            regions,
            resample,
            prox_interval,
        } => {
            let rules = RulesFile::from_file(&rules)?;
            let layers = load_layers(&rules, &regions)?;

            let config = PipelineConfig {
                checkpoint_interval: CHECKPOINT_INTERVAL_REPLAY,
                ..Default::default()
            };
            let mut pipeline = Pipeline::with_config(rules, layers.clone(), config);
            let tracker = attach_los_tracker(&pipeline);

            if resample {
                pipeline.enable_resampler(Resampler::new(
                    ResamplerConfig::default(),
                    Arc::new(layers.clone()),
                    Arc::clone(pipeline.stats()),
                ));
            }

            let reader = skywatch::ReplayReader::open(&input)?;
            pipeline.run_iter(reader);

            if let Some(resampler) = pipeline.resampler() {
                info!("running post-hoc proximity analysis");
                let resampler = resampler.lock().unwrap();
                let gc_tracker = Arc::clone(&tracker);
                resampler.do_prox_checks(
                    pipeline.engine(),
                    Arc::new(layers),
                    prox_interval,
                    move |t| gc_tracker.gc(t),
                );
                resampler.report_stats();
            }

            // Finalize whatever is still open, then report.
            tracker.gc(f64::MAX);
            pipeline.engine().report_rule_counts();
            pipeline.stats().report();
            Ok(())
        }
    };
    result.context("command failed")
}
