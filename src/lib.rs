//! skywatch — ADS-B stream rule engine.
//!
//! Ingests a live (or replayed) stream of decoded ADS-B position reports,
//! tracks each aircraft's state and region membership, evaluates declarative
//! rules against every update, and discovers loss-of-separation events
//! between aircraft pairs. See `Pipeline` for the composed entry point.

pub mod callbacks;
pub mod emit;
pub mod flight;
pub mod geometry;
pub mod icao;
pub mod ingest;
pub mod location;
pub mod los;
pub mod regions;
pub mod registry;
pub mod replay;
pub mod resampler;
pub mod rules;
pub mod stats;
pub mod telemetry;
pub mod webhooks;

pub use flight::{Flight, FlightHandle};
pub use ingest::{Pipeline, PipelineConfig};
pub use location::{AircraftInfo, Location};
pub use los::{LosEvent, LosQuality, LosSink, LosTracker};
pub use regions::{Region, RegionSet};
pub use registry::FlightRegistry;
pub use replay::ReplayReader;
pub use resampler::{Resampler, ResamplerConfig};
pub use rules::config::RulesFile;
pub use rules::{RuleEngine, RuleEngineConfig};
pub use stats::Stats;
