use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo, TxtProperty};
use futures::future::join_all;
use anyhow::{Context, Result};
use shared::types::TargetRecord;
use crate::mdns::classify::{classify, Announcement};

/// One discovery round: everything announced within `timeout`, classified into targets.
pub trait Scanner: Send + Sync + 'static {
    fn scan(&self, timeout: Duration) -> impl Future<Output = Result<Vec<TargetRecord>>> + Send;
}

/// Scans the local network with mDNS, one browse per configured service type.
/// Each round runs its own daemon so socket failures only cost that round.
pub struct MdnsScanner {
    service_types: Vec<String>,
    allow_ipv6: bool,
}

impl MdnsScanner {
    pub fn new(service_types: Vec<String>, allow_ipv6: bool) -> Self {
        Self {
            service_types,
            allow_ipv6,
        }
    }
}

impl Scanner for MdnsScanner {
    async fn scan(&self, timeout: Duration) -> Result<Vec<TargetRecord>> {
        let deadline = Instant::now() + timeout;
        let daemon = ServiceDaemon::new().context("Failed to create mDNS daemon")?;

        let rounds = join_all(
            self.service_types
                .iter()
                .map(|service_type| browse_until(&daemon, service_type, deadline)),
        )
        .await;

        if let Err(e) = daemon.shutdown() {
            tracing::warn!("Failed to shutdown mDNS daemon: {}", e);
        }

        let announcements = gather_rounds(&self.service_types, rounds)?;

        let targets: Vec<TargetRecord> = announcements
            .iter()
            .filter_map(|announcement| {
                let target = classify(announcement, self.allow_ipv6)?;
                tracing::debug!(
                    "Found {} via mDNS ({}, host {})",
                    target.name(),
                    announcement.service_type,
                    announcement.hostname
                );
                Some(target)
            })
            .collect();

        tracing::debug!("mDNS round found {} targets", targets.len());
        Ok(targets)
    }
}

/// Concatenate per-type browse results in configured order.
/// A type whose browse could not start is logged and skipped; the round fails
/// only when no browse started at all.
fn gather_rounds(
    service_types: &[String],
    rounds: Vec<Result<Vec<Announcement>>>,
) -> Result<Vec<Announcement>> {
    let mut announcements = Vec::new();
    let mut started = 0;
    let mut first_failure = None;

    for (service_type, result) in service_types.iter().zip(rounds) {
        match result {
            Ok(found) => {
                started += 1;
                announcements.extend(found);
            }
            Err(e) => {
                tracing::error!("mDNS query for {} failed: {:#}", service_type, e);
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
    }

    match first_failure {
        Some(e) if started == 0 => Err(e),
        _ => Ok(announcements),
    }
}

/// Browse one service type until the deadline
async fn browse_until(
    daemon: &ServiceDaemon,
    service_type: &str,
    deadline: Instant,
) -> Result<Vec<Announcement>> {
    let receiver = daemon
        .browse(service_type)
        .with_context(|| format!("Failed to browse {}", service_type))?;

    Ok(collect_until(receiver, deadline).await)
}

/// Drain resolved services from a browse receiver until the deadline passes
async fn collect_until(
    receiver: flume::Receiver<ServiceEvent>,
    deadline: Instant,
) -> Vec<Announcement> {
    let mut announcements = Vec::new();

    loop {
        match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
            Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                announcements.push(convert_service_info(&info));
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::warn!("mDNS receiver disconnected: {}", e);
                break;
            }
            Err(_) => break,
        }
    }

    announcements
}

/// Properties arrive pre-split; rebuild the raw `key=value` form so valueless
/// keys are dropped by `parse_txt` like any other malformed entry
fn raw_txt_entry(prop: &TxtProperty) -> String {
    match prop.val() {
        Some(_) => format!("{}={}", prop.key(), prop.val_str()),
        None => prop.key().to_string(),
    }
}

/// Convert an mdns-sd ServiceInfo to our Announcement
fn convert_service_info(info: &ServiceInfo) -> Announcement {
    let service_type = info.get_type().to_string();

    let instance_name = info
        .get_fullname()
        .strip_suffix(service_type.as_str())
        .unwrap_or_else(|| info.get_fullname())
        .trim_end_matches('.')
        .to_string();

    let txt = info.get_properties().iter().map(raw_txt_entry).collect();

    Announcement {
        service_type,
        instance_name,
        hostname: info.get_hostname().to_string(),
        addresses: info.get_addresses().iter().copied().collect(),
        port: info.get_port(),
        txt,
    }
}
