//! The composed system and the loops that drive it.
//!
//! One ingest task reads newline-delimited JSON (from a TCP feed or any
//! iterator), turns each line into a Location, and pushes it through the
//! registry and rule engine. Maintenance (flight expiry, proximity sweeps)
//! runs on a checkpoint clocked by *ingested* time, so replays at any speed
//! behave exactly like live runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::flight::Flight;
use crate::location::Location;
use crate::regions::RegionSet;
use crate::registry::{FlightRegistry, EXPIRE_SECS};
use crate::resampler::Resampler;
use crate::rules::config::RulesFile;
use crate::rules::{RuleEngine, RuleEngineConfig};
use crate::stats::Stats;

/// Seconds of ingested time between maintenance checkpoints on the live
/// (network) path.
pub const CHECKPOINT_INTERVAL_NETWORK: f64 = 5.0;
/// Checkpoint cadence for batch replays.
pub const CHECKPOINT_INTERVAL_REPLAY: f64 = 10.0;
/// Seconds to sleep before reconnecting after a network read failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub checkpoint_interval: f64,
    pub expire_secs: f64,
    pub rule_engine: RuleEngineConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: CHECKPOINT_INTERVAL_NETWORK,
            expire_secs: EXPIRE_SECS,
            rule_engine: RuleEngineConfig::default(),
        }
    }
}

/// Everything one stream needs: registry, rules, counters, and optionally a
/// resampler shadowing each position for post-hoc analysis. Construct once,
/// register callbacks, then drive with `run_network` or `run_iter`.
pub struct Pipeline {
    registry: FlightRegistry,
    engine: RuleEngine,
    resampler: Option<Mutex<Resampler>>,
    stats: Arc<Stats>,
    config: PipelineConfig,
    last_checkpoint: Mutex<Option<f64>>,
    exit_flag: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(rules: RulesFile, layers: Vec<RegionSet>) -> Pipeline {
        Self::with_config(rules, layers, PipelineConfig::default())
    }

    pub fn with_config(rules: RulesFile, layers: Vec<RegionSet>, config: PipelineConfig) -> Pipeline {
        let stats = Arc::new(Stats::new());
        let layers = Arc::new(layers);
        let engine = RuleEngine::new(rules, Arc::clone(&stats), config.rule_engine.clone());
        Pipeline {
            registry: FlightRegistry::new(layers),
            engine,
            resampler: None,
            stats,
            config,
            last_checkpoint: Mutex::new(None),
            exit_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shadow every ingested position into a resampler for later proximity
    /// analysis.
    pub fn enable_resampler(&mut self, resampler: Resampler) {
        self.resampler = Some(Mutex::new(resampler));
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn registry(&self) -> &FlightRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    pub fn resampler(&self) -> Option<&Mutex<Resampler>> {
        self.resampler.as_ref()
    }

    /// Flag polled by the loops; setting it drains the current message and
    /// stops.
    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.exit_flag)
    }

    pub fn register_callback<F>(&self, name: &str, f: F)
    where
        F: Fn(&mut Flight) + Send + Sync + 'static,
    {
        self.engine.register_callback(name, f);
    }

    pub fn register_pair_callback<F>(&self, name: &str, f: F)
    where
        F: Fn(&Flight, &Flight) + Send + Sync + 'static,
    {
        self.engine.register_pair_callback(name, f);
    }

    pub fn register_webhook<F>(&self, kind: &str, f: F)
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        self.engine.register_webhook(kind, f);
    }

    /// Process one parsed message. Returns the ingested timestamp when the
    /// message carried one (heartbeats included), which drives the
    /// checkpoint clock.
    pub fn handle_message(&self, value: &Value) -> Option<f64> {
        Stats::bump(&self.stats.json_readlines);
        metrics::counter!("ingest.messages_total").increment(1);

        let Some(loc) = Location::from_json(value) else {
            Stats::bump(&self.stats.parse_failures);
            return None;
        };

        if let Some(resampler) = &self.resampler {
            resampler.lock().unwrap().add_location(&loc);
        }

        Some(self.registry.add_location(loc, &self.engine))
    }

    /// Run maintenance if enough ingested time has passed since the last
    /// checkpoint: expire quiet flights, then sweep proximity rules.
    pub fn checkpoint(&self, last_read_time: f64) {
        let mut last = self.last_checkpoint.lock().unwrap();
        let Some(prev) = *last else {
            *last = Some(last_read_time);
            return;
        };
        if last_read_time - prev < self.config.checkpoint_interval {
            return;
        }
        *last = Some(last_read_time);
        drop(last);

        debug!("checkpoint at {last_read_time}");
        metrics::counter!("ingest.checkpoints_total").increment(1);
        self.registry
            .expire_old(&self.engine, last_read_time, self.config.expire_secs);
        self.registry.check_distance(&self.engine, last_read_time);
    }

    /// Drive the pipeline from an iterator of parsed JSON messages (replay
    /// mode). Heartbeat entries advance time; anything unparseable was
    /// filtered upstream.
    pub fn run_iter<I: IntoIterator<Item = Value>>(&self, messages: I) {
        for value in messages {
            if self.exit_flag.load(Ordering::Relaxed) {
                info!("exit flag set, stopping replay loop");
                break;
            }
            if let Some(ts) = self.handle_message(&value) {
                self.checkpoint(ts);
            }
        }
    }

    /// Connect to a readsb-style JSON feed and ingest until the stream ends
    /// or a shutdown signal arrives. Read failures sleep briefly and
    /// reconnect while `retry` holds; with `retry` false the loop exits on
    /// the first failure instead.
    pub async fn run_network(&self, host: &str, port: u16, retry: bool) -> Result<()> {
        let exit_flag = self.exit_flag();
        spawn_signal_handler(exit_flag.clone());

        'reconnect: loop {
            if exit_flag.load(Ordering::Relaxed) {
                break;
            }
            info!("connecting to {host}:{port}");
            let stream = match TcpStream::connect((host, port)).await {
                Ok(s) => {
                    info!("connected to {host}:{port}");
                    metrics::gauge!("ingest.connected").set(1.0);
                    s
                }
                Err(e) => {
                    if !retry {
                        return Err(e).context("connect failed");
                    }
                    warn!("connect to {host}:{port} failed ({e}), retrying");
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            loop {
                if exit_flag.load(Ordering::Relaxed) {
                    info!("shutdown requested, draining and stopping");
                    break 'reconnect;
                }
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        info!("stream ended");
                        break 'reconnect;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(trimmed) {
                            Ok(value) => {
                                if let Some(ts) = self.handle_message(&value) {
                                    self.checkpoint(ts);
                                }
                            }
                            Err(e) => {
                                Stats::bump(&self.stats.parse_failures);
                                error!("JSON parse fail ({e}): {trimmed}");
                            }
                        }
                    }
                    Err(e) => {
                        metrics::gauge!("ingest.connected").set(0.0);
                        if !retry {
                            error!("read error without retry, exiting: {e}");
                            break 'reconnect;
                        }
                        warn!("read error ({e}), reconnecting in {RECONNECT_DELAY:?}");
                        sleep(RECONNECT_DELAY).await;
                        continue 'reconnect;
                    }
                }
            }
        }

        metrics::gauge!("ingest.connected").set(0.0);
        self.stats.report();
        Ok(())
    }
}

/// Arrange for SIGINT/SIGTERM to set the exit flag; the ingest loop drains
/// the message in flight and stops. In-flight sink writes are never
/// interrupted.
fn spawn_signal_handler(exit_flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let terminate = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sig) => {
                        sig.recv().await;
                    }
                    Err(e) => {
                        error!("failed to install SIGTERM handler: {e}");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            std::future::pending::<()>().await;
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = terminate => info!("SIGTERM received"),
        }
        exit_flag.store(true, Ordering::Relaxed);
    });
}
