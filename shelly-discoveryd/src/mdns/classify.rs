use std::net::IpAddr;
use shared::protocol::{
    PREFIX_EM3, PREFIX_PLUG, PREFIX_PLUS, PREFIX_PRO, SHELLY_SERVICE_TYPE, TXT_GENERATION,
    TXT_VERSION,
};
use shared::types::{DeviceKind, TargetRecord};

/// A resolved mDNS announcement, reduced to what classification needs
#[derive(Debug, Clone)]
pub struct Announcement {
    /// Service type the announcement answered, e.g. "_http._tcp.local."
    pub service_type: String,
    /// Instance name without the service type suffix, e.g. "shellyplug-s-C8C9A3"
    pub instance_name: String,
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    /// Raw `key=value` TXT strings
    pub txt: Vec<String>,
}

const NAME_PREFIXES: [(&str, DeviceKind); 4] = [
    (PREFIX_PLUG, DeviceKind::Plug),
    (PREFIX_PLUS, DeviceKind::Plus),
    (PREFIX_PRO, DeviceKind::Pro),
    (PREFIX_EM3, DeviceKind::Em3),
];

/// Split TXT strings on the first `=`; entries without one are dropped
pub fn parse_txt(txt: &[String]) -> Vec<(&str, &str)> {
    txt.iter().filter_map(|entry| entry.split_once('=')).collect()
}

/// Turn an announcement into a target, or None if it is not a usable Shelly device
pub fn classify(announcement: &Announcement, allow_ipv6: bool) -> Option<TargetRecord> {
    if announcement.instance_name.is_empty() {
        return None;
    }
    let address = pick_address(&announcement.addresses, allow_ipv6)?;

    let attributes = parse_txt(&announcement.txt);
    let attribute = |key: &str| {
        attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.to_string())
    };
    let generation = attribute(TXT_GENERATION);
    let version = attribute(TXT_VERSION);

    let name = announcement.instance_name.to_lowercase();
    let kind = NAME_PREFIXES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, kind)| *kind)
        .or_else(|| (generation.as_deref() == Some("2")).then_some(DeviceKind::Pro))
        .or_else(|| {
            (announcement.service_type == SHELLY_SERVICE_TYPE).then_some(DeviceKind::Unknown)
        })?;

    let mut target = TargetRecord::new(address.to_string(), announcement.port, kind);
    target.hostname = announcement.instance_name.clone();
    target.generation = generation;
    target.version = version;
    Some(target)
}

/// Lowest IPv4 address, or lowest IPv6 address when allowed and no IPv4 is announced
fn pick_address(addresses: &[IpAddr], allow_ipv6: bool) -> Option<IpAddr> {
    let v4 = addresses.iter().filter(|addr| addr.is_ipv4()).min();
    match v4 {
        Some(addr) => Some(*addr),
        None if allow_ipv6 => addresses.iter().filter(|addr| addr.is_ipv6()).min().copied(),
        None => None,
    }
}
