use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One of the two sequential sub-tests comprising a full run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Download stage: fetch a large payload from one of the candidate
    /// endpoints and measure receive throughput.
    Download,
    /// Upload stage: push a fixed-size synthetic payload to the upload
    /// endpoint and measure send throughput.
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Download => write!(f, "download"),
            Stage::Upload => write!(f, "upload"),
        }
    }
}

/// Progress event types reported during a speed test run.
///
/// Events are emitted in a fixed order per stage: a `StageStarted`, any
/// number of `Progress`/`SpeedUpdate` pairs, then exactly one `StageResult`.
/// A successful run ends with a single `Complete`; a failed run with a
/// single `Error`. `Ready` is emitted when the engine is reset to idle.
///
/// # Examples
///
/// ```no_run
/// use speedprobe::{Config, HttpChannel, SpeedTest, TestEvent};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = Arc::new(HttpChannel::new()?);
/// let test = SpeedTest::new(Config::new(), channel)?.with_callback(|event: TestEvent| {
///     match event {
///         TestEvent::SpeedUpdate { smoothed_speed_mbps } => {
///             println!("{:.2} Mbps", smoothed_speed_mbps);
///         }
///         TestEvent::StageResult { stage, speed_mbps } => {
///             println!("{}: {:.2} Mbps", stage, speed_mbps);
///         }
///         _ => {}
///     }
/// });
/// test.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TestEvent {
    /// The engine was reset to idle and can accept a new run.
    Ready,
    /// A stage began, or a fallback attempt within the download stage
    /// switched to the next candidate endpoint.
    StageStarted {
        stage: Stage,
        status_text: String,
        /// Human-readable expected transfer size, when known up front
        /// (the upload payload is fixed; download sizes are discovered).
        #[serde(skip_serializing_if = "Option::is_none")]
        expected_size_label: Option<String>,
    },
    /// Byte-level progress within the active stage.
    ///
    /// During the upload stage only `elapsed_seconds` is meaningful: the
    /// transfer channel cannot observe upload bytes in flight.
    Progress {
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        loaded_bytes: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
        elapsed_seconds: f64,
    },
    /// New smoothed live speed estimate (download stage only).
    SpeedUpdate { smoothed_speed_mbps: f64 },
    /// Authoritative average speed for a completed stage.
    StageResult { stage: Stage, speed_mbps: f64 },
    /// The full run finished successfully.
    Complete { total_elapsed_seconds: f64 },
    /// The run failed; emitted exactly once per failed run.
    Error { message: String },
}

/// Callback trait for receiving test events.
///
/// Automatically implemented for any closure with the right signature.
pub trait ProgressCallback: Send + Sync {
    fn on_event(&self, event: TestEvent);
}

impl<F> ProgressCallback for F
where
    F: Fn(TestEvent) + Send + Sync,
{
    fn on_event(&self, event: TestEvent) {
        self(event)
    }
}

/// Final results of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    /// Average download speed in Mbps
    pub download_mbps: f64,
    /// Average upload speed in Mbps
    pub upload_mbps: f64,
    /// Wall-clock duration of the whole run, including the inter-stage pause
    pub total_elapsed: Duration,
}
