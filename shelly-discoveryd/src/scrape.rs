use std::collections::HashMap;
use std::time::Duration;
use anyhow::{anyhow, bail, Context, Result};
use futures::future::join_all;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::Instant;
use shared::protocol::SHELLY_INFO_PATH;
use shared::types::{TargetRecord, TARGET_HEALTH_DEAD};
use crate::config::ProbeConfig;
use crate::directory_manager::DirectoryHandle;

/// Header Prometheus uses to announce its scrape timeout
pub const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";

/// Identity document served by every Shelly device at `/shelly`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShellyInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
    /// Only present on generation 2 devices
    #[serde(default)]
    pub gen: Option<u8>,
}

impl ShellyInfo {
    pub fn generation(&self) -> u8 {
        self.gen.unwrap_or(1)
    }
}

/// HTTP client shared by all scrapes
#[derive(Clone)]
pub struct ShellyClient {
    http: reqwest::Client,
    username: Option<String>,
    password: String,
}

impl ShellyClient {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let username = (!config.username.is_empty()).then(|| config.username.clone());

        Ok(Self {
            http,
            username,
            password: config.password.clone(),
        })
    }

    /// Fetch the device identity document
    pub async fn fetch_info(&self, target: &TargetRecord) -> Result<ShellyInfo> {
        let mut request = self.http.get(target.url(SHELLY_INFO_PATH));
        if let Some(username) = &self.username {
            request = request.basic_auth(username, Some(&self.password));
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => {
                bail!("Device requires authentication and/or credentials are invalid")
            }
            status => bail!("Expected HTTP status 200, got {}", status),
        }

        let info = response
            .json::<ShellyInfo>()
            .await
            .context("Failed to decode device info")?;
        Ok(info)
    }
}

/// Result of probing one target
struct ProbeOutcome {
    target: TargetRecord,
    info: Option<ShellyInfo>,
}

/// Per-scrape metric families, registered in a fresh registry for every scrape
struct ScrapeMetrics {
    registry: Registry,
    up: IntGaugeVec,
    health: IntGaugeVec,
    info: IntGaugeVec,
}

impl ScrapeMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let up = IntGaugeVec::new(
            Opts::new("shelly_target_up", "Whether the last probe of the target succeeded"),
            &["target", "type"],
        )?;
        let health = IntGaugeVec::new(
            Opts::new("shelly_target_health", "Discovery health score of the target"),
            &["target", "type", "static"],
        )?;
        let info = IntGaugeVec::new(
            Opts::new("shelly_target_info", "Shelly device information"),
            &["target", "hostname", "type", "mac", "name", "model", "app", "generation"],
        )?;

        registry.register(Box::new(up.clone()))?;
        registry.register(Box::new(health.clone()))?;
        registry.register(Box::new(info.clone()))?;

        Ok(Self { registry, up, health, info })
    }

    /// `health` is the directory's score once this scrape's marks have been applied
    fn record(&self, outcome: &ProbeOutcome, health: u8) {
        let target = &outcome.target;
        let kind = target.kind.as_str();

        self.up
            .with_label_values(&[target.address.as_str(), kind])
            .set(i64::from(outcome.info.is_some()));
        self.health
            .with_label_values(&[target.address.as_str(), kind, if target.is_static { "true" } else { "false" }])
            .set(i64::from(health));

        if let Some(info) = &outcome.info {
            let generation = info.generation().to_string();
            self.info
                .with_label_values(&[
                    target.address.as_str(),
                    target.hostname.as_str(),
                    kind,
                    info.mac.as_deref().unwrap_or_default(),
                    info.name.as_deref().unwrap_or_default(),
                    info.model.as_deref().unwrap_or_default(),
                    info.app.as_deref().unwrap_or_default(),
                    generation.as_str(),
                ])
                .set(1);
        }
    }

    fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| anyhow!("Metrics are not valid UTF-8: {}", e))
    }
}

/// Probe every current target concurrently within `timeout`, report health back
/// into the directory and render the results as Prometheus text.
pub async fn scrape(
    directory: &DirectoryHandle,
    client: &ShellyClient,
    timeout: Duration,
) -> Result<String> {
    let deadline = Instant::now() + timeout;
    let targets = directory.get_targets().await?;

    let outcomes = join_all(
        targets
            .into_iter()
            .map(|target| probe_target(directory, client, target, deadline)),
    )
    .await;

    // Targets evicted by this scrape's marks report as dead
    let health: HashMap<String, u8> = directory
        .get_targets()
        .await?
        .into_iter()
        .map(|target| (target.address, target.health))
        .collect();

    let metrics = ScrapeMetrics::new()?;
    for outcome in &outcomes {
        let current = health
            .get(&outcome.target.address)
            .copied()
            .unwrap_or(TARGET_HEALTH_DEAD);
        metrics.record(outcome, current);
    }
    metrics.encode()
}

async fn probe_target(
    directory: &DirectoryHandle,
    client: &ShellyClient,
    target: TargetRecord,
    deadline: Instant,
) -> ProbeOutcome {
    tracing::debug!("Probing {}", target.name());

    let result = match tokio::time::timeout_at(deadline, client.fetch_info(&target)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("Scrape deadline exceeded")),
    };

    let info = match result {
        Ok(info) => {
            if let Err(e) = directory.mark_target(&target.address, true).await {
                tracing::error!("Failed to mark {} healthy: {}", target.address, e);
            }
            if let Some(name) = info.name.as_deref().filter(|name| !name.is_empty()) {
                if let Err(e) = directory.set_device_name(&target.address, name).await {
                    tracing::error!("Failed to annotate {}: {}", target.address, e);
                }
            }
            Some(info)
        }
        Err(e) => {
            tracing::warn!("Failed to probe {}: {:#}", target.name(), e);
            if let Err(e) = directory.mark_target(&target.address, false).await {
                tracing::error!("Failed to mark {} unhealthy: {}", target.address, e);
            }
            None
        }
    };

    ProbeOutcome { target, info }
}

/// Scrape deadline from the Prometheus header, or the default when absent or zero
pub fn scrape_timeout(header: Option<&str>, default_secs: f64) -> Result<Duration> {
    let mut seconds = match header {
        Some(value) => value
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Invalid scrape timeout \"{}\"", value))?,
        None => 0.0,
    };
    if seconds <= 0.0 {
        seconds = default_secs;
    }
    Duration::try_from_secs_f64(seconds).with_context(|| format!("Invalid scrape timeout {}", seconds))
}
