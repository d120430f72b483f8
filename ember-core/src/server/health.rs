//! Health probing for the inference server.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Deserialize;

/// Number of recent probes the composite score considers.
pub const HEALTH_WINDOW: usize = 4;

/// Minimum composite score for the server to count as healthy.
pub const HEALTH_THRESHOLD: f64 = 0.25;

/// Delay between probes.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    status: String,
}

/// Sliding window of probe samples.
#[derive(Debug, Default)]
pub struct HealthWindow {
    samples: VecDeque<f64>,
}

impl HealthWindow {
    /// Record one probe sample, evicting the oldest beyond the window.
    pub fn record(&mut self, sample: f64) {
        if self.samples.len() == HEALTH_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Fraction of healthy samples among the last [`HEALTH_WINDOW`] probes.
    ///
    /// Probes not yet taken count as unhealthy.
    pub fn score(&self) -> f64 {
        self.samples.iter().sum::<f64>() / HEALTH_WINDOW as f64
    }

    /// Whether the score has reached [`HEALTH_THRESHOLD`].
    pub fn is_healthy(&self) -> bool {
        self.score() >= HEALTH_THRESHOLD
    }
}

/// Probe `GET <base_url>/health` once.
///
/// Returns `1.0` when the server answers with status `"ok"` and `0.0` for
/// anything else, including connection failures and a loading model.
pub async fn probe(client: &reqwest::Client, health_url: &str) -> f64 {
    let response = match client.get(health_url).timeout(PROBE_TIMEOUT).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::trace!(error = %e, "server: health probe failed");
            return 0.0;
        }
    };
    if !response.status().is_success() {
        return 0.0;
    }
    match response.json::<HealthBody>().await {
        Ok(body) if body.status == "ok" => 1.0,
        Ok(body) => {
            tracing::trace!(status = %body.status, "server: not ready");
            0.0
        }
        Err(_) => 0.0,
    }
}
