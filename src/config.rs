use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default download endpoint ladder, smallest transfer first.
///
/// Cloudflare's speed test endpoints are used because they serve arbitrary
/// payload sizes and allow cross-origin requests.
pub const DEFAULT_DOWNLOAD_URLS: [&str; 4] = [
    "https://speed.cloudflare.com/__down?bytes=10000000",
    "https://speed.cloudflare.com/__down?bytes=25000000",
    "https://speed.cloudflare.com/__down?bytes=50000000",
    "https://speed.cloudflare.com/__down?bytes=100000000",
];

/// Default upload endpoint. The upload stage uses a single fixed target,
/// so no fallback list exists for it.
pub const DEFAULT_UPLOAD_URL: &str = "https://speed.cloudflare.com/__up";

/// Configuration for a speed test run.
///
/// Holds the endpoint lists, payload sizing, and the timing knobs of the
/// measurement engine. Use the builder-style `with_*` methods to customize.
///
/// # Examples
///
/// ```
/// use speedprobe::Config;
/// use std::time::Duration;
///
/// let config = Config::new()
///     .with_download_urls(vec!["https://example.com/100mb.bin".to_string()])
///     .with_attempt_timeout(Duration::from_secs(15));
///
/// assert_eq!(config.attempt_timeout, Duration::from_secs(15));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Candidate download endpoints, tried in order until one succeeds
    pub download_urls: Vec<String>,

    /// Upload endpoint (single target, no fallback)
    pub upload_url: String,

    /// Size of the synthetic upload payload in bytes
    pub upload_bytes: u64,

    /// Per-endpoint timeout for a download attempt
    pub attempt_timeout: Duration,

    /// Pause between the download and upload stages, gives the observer a
    /// moment to register the download result; may be zero
    pub stage_pause: Duration,

    /// How often elapsed-time progress is reported during the upload stage
    pub upload_poll_interval: Duration,

    /// EMA smoothing factor for the live speed estimate, in (0, 1]
    pub smoothing_factor: f64,

    /// Minimum spacing between samples used for the smoothed estimate
    pub min_sample_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_urls: DEFAULT_DOWNLOAD_URLS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            upload_bytes: 5 * 1024 * 1024, // 5 MiB
            attempt_timeout: Duration::from_secs(30),
            stage_pause: Duration::from_secs(1),
            upload_poll_interval: Duration::from_millis(100),
            smoothing_factor: 0.2,
            min_sample_interval: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Creates a configuration with the default endpoints and timing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the download endpoint list.
    ///
    /// Endpoints are attempted in order; each at most once per run.
    pub fn with_download_urls(mut self, urls: Vec<String>) -> Self {
        self.download_urls = urls;
        self
    }

    /// Sets the upload endpoint.
    pub fn with_upload_url(mut self, url: String) -> Self {
        self.upload_url = url;
        self
    }

    /// Sets the synthetic upload payload size in bytes.
    pub fn with_upload_bytes(mut self, bytes: u64) -> Self {
        self.upload_bytes = bytes;
        self
    }

    /// Sets the per-endpoint download timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Sets the pause between the download and upload stages.
    ///
    /// The pause is a presentation concession, not a correctness
    /// requirement; `Duration::ZERO` is valid.
    pub fn with_stage_pause(mut self, pause: Duration) -> Self {
        self.stage_pause = pause;
        self
    }

    /// Sets how often elapsed time is reported while uploading.
    pub fn with_upload_poll_interval(mut self, interval: Duration) -> Self {
        self.upload_poll_interval = interval;
        self
    }

    /// Sets the EMA smoothing factor. Lower is smoother.
    pub fn with_smoothing_factor(mut self, factor: f64) -> Self {
        self.smoothing_factor = factor;
        self
    }

    /// Sets the minimum spacing between smoothing samples.
    pub fn with_min_sample_interval(mut self, interval: Duration) -> Self {
        self.min_sample_interval = interval;
        self
    }

    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.download_urls.is_empty() {
            return Err(Error::Config(
                "at least one download endpoint is required".to_string(),
            ));
        }
        if self.upload_url.is_empty() {
            return Err(Error::Config("an upload endpoint is required".to_string()));
        }
        if self.upload_bytes == 0 {
            return Err(Error::Config(
                "the upload payload size must be non-zero".to_string(),
            ));
        }
        if !(self.smoothing_factor > 0.0 && self.smoothing_factor <= 1.0) {
            return Err(Error::Config(
                "the smoothing factor must be within (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.download_urls.len(), 4);
        assert_eq!(config.upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.attempt_timeout, Duration::from_secs(30));
    }

    #[test]
    fn builder_chaining() {
        let config = Config::new()
            .with_download_urls(vec!["http://a".into(), "http://b".into()])
            .with_upload_url("http://up".into())
            .with_upload_bytes(1024)
            .with_stage_pause(Duration::ZERO)
            .with_smoothing_factor(0.5);

        assert_eq!(config.download_urls.len(), 2);
        assert_eq!(config.upload_url, "http://up");
        assert_eq!(config.upload_bytes, 1024);
        assert_eq!(config.stage_pause, Duration::ZERO);
        assert_eq!(config.smoothing_factor, 0.5);
    }

    #[test]
    fn empty_endpoint_list_is_rejected() {
        let config = Config::new().with_download_urls(Vec::new());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn out_of_range_smoothing_factor_is_rejected() {
        assert!(Config::new().with_smoothing_factor(0.0).validate().is_err());
        assert!(Config::new().with_smoothing_factor(1.5).validate().is_err());
        assert!(Config::new().with_smoothing_factor(1.0).validate().is_ok());
    }
}
