//! speedprobe - a two-stage network speed test engine
//!
//! This library measures network throughput from a client by sequentially
//! running a large download transfer and a large upload transfer, producing
//! a smoothed live speed estimate and an authoritative per-stage average.
//!
//! # Features
//!
//! - Download measurement with immediate fallback across candidate endpoints
//! - Upload measurement against a single fixed endpoint
//! - Exponential-moving-average smoothing of the live speed display
//! - Progress reporting through callback events
//! - Pluggable transfer channel; an HTTP implementation is included
//! - Asynchronous, cancellable execution using tokio

pub mod channel;
pub mod config;
pub mod error;
pub mod estimator;
pub mod event;
pub mod http;
pub mod selector;
pub mod session;

pub use channel::{TransferChannel, TransferEvent, TransferHandle};
pub use config::Config;
pub use error::{Error, Result};
pub use estimator::{average_mbps, SpeedEstimator};
pub use event::{ProgressCallback, Stage, TestEvent, TestReport};
pub use http::HttpChannel;
pub use selector::{EndpointSelector, FailureKind};
pub use session::{SpeedTest, TestState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
