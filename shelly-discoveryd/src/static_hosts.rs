use std::net::Ipv6Addr;
use anyhow::{bail, Context, Result};
use shared::protocol::DEFAULT_PORT;
use shared::types::{DeviceKind, TargetRecord, TARGET_HEALTH_GOOD};
use crate::config::HostsConfig;

/// Build the static target list from every configured device family
pub fn load(hosts: &HostsConfig) -> Result<Vec<TargetRecord>> {
    let mut targets = Vec::new();
    targets.extend(parse_host_list(&hosts.plug, DeviceKind::Plug)?);
    targets.extend(parse_host_list(&hosts.plus, DeviceKind::Plus)?);
    targets.extend(parse_host_list(&hosts.pro, DeviceKind::Pro)?);
    targets.extend(parse_host_list(&hosts.em3, DeviceKind::Em3)?);
    Ok(targets)
}

/// Parse `host` / `host:port` entries of one family. Empty entries are skipped.
/// IPv6 addresses are written bare (`fd00::1`) or bracketed (`[fd00::1]:8080`).
pub fn parse_host_list(entries: &[String], kind: DeviceKind) -> Result<Vec<TargetRecord>> {
    entries
        .iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            parse_host(entry, kind)
                .with_context(|| format!("Invalid static {} host \"{}\"", kind, entry))
        })
        .collect()
}

fn parse_host(entry: &str, kind: DeviceKind) -> Result<TargetRecord> {
    let (host, port) = match split_host_port(entry)? {
        (host, Some(port)) => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Port \"{}\" is not a number", port))?;
            (host, port)
        }
        (host, None) => (host, DEFAULT_PORT),
    };

    if host.is_empty() {
        bail!("Missing host");
    }

    let mut target = TargetRecord::new(host, port, kind);
    target.is_static = true;
    target.health = TARGET_HEALTH_GOOD;
    Ok(target)
}

fn split_host_port(entry: &str) -> Result<(&str, Option<&str>)> {
    if let Some(rest) = entry.strip_prefix('[') {
        let Some((host, rest)) = rest.split_once(']') else {
            bail!("Missing closing bracket");
        };
        if host.parse::<Ipv6Addr>().is_err() {
            bail!("\"{}\" is not an IPv6 address", host);
        }
        return match rest {
            "" => Ok((host, None)),
            _ => match rest.strip_prefix(':') {
                Some(port) => Ok((host, Some(port))),
                None => bail!("Unexpected \"{}\" after address", rest),
            },
        };
    }

    if entry.parse::<Ipv6Addr>().is_ok() {
        return Ok((entry, None));
    }

    Ok(match entry.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (entry, None),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_host_with_port() {
        let targets = parse_host_list(&entries(&["10.0.0.5:8080"]), DeviceKind::Plug).unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].address, "10.0.0.5");
        assert_eq!(targets[0].hostname, "10.0.0.5");
        assert_eq!(targets[0].port, 8080);
        assert_eq!(targets[0].kind, DeviceKind::Plug);
        assert!(targets[0].is_static);
        assert_eq!(targets[0].health, TARGET_HEALTH_GOOD);
    }

    #[test]
    fn test_default_port() {
        let targets = parse_host_list(&entries(&["plug.lan"]), DeviceKind::Plus).unwrap();
        assert_eq!(targets[0].port, 80);
        assert_eq!(targets[0].kind, DeviceKind::Plus);
    }

    #[test]
    fn test_skips_empty_and_splits_commas() {
        let targets = parse_host_list(
            &entries(&["", "10.0.0.1, 10.0.0.2:81,", "  "]),
            DeviceKind::Pro,
        )
        .unwrap();

        let addresses: Vec<_> = targets.iter().map(|t| (t.address.as_str(), t.port)).collect();
        assert_eq!(addresses, vec![("10.0.0.1", 80), ("10.0.0.2", 81)]);
    }

    #[test]
    fn test_non_numeric_port_is_error() {
        let result = parse_host_list(&entries(&["10.0.0.5:http"]), DeviceKind::Plug);
        assert!(result.is_err());
    }

    #[test]
    fn test_ipv6_hosts() {
        let targets = parse_host_list(
            &entries(&["[fd00::1]:8080", "fd00::2", "[fd00::3]"]),
            DeviceKind::Pro,
        )
        .unwrap();

        let addresses: Vec<_> = targets.iter().map(|t| (t.address.as_str(), t.port)).collect();
        assert_eq!(addresses, vec![("fd00::1", 8080), ("fd00::2", 80), ("fd00::3", 80)]);
        assert_eq!(targets[0].url("/shelly"), "http://[fd00::1]:8080/shelly");
    }

    #[test]
    fn test_malformed_ipv6_is_error() {
        for entry in ["[fd00::1", "[fd00::1]8080", "[fd00::1]:http", "[plug.lan]:80", "fd00::zz"] {
            assert!(parse_host_list(&entries(&[entry]), DeviceKind::Pro).is_err(), "{}", entry);
        }
    }

    #[test]
    fn test_missing_host_is_error() {
        assert!(parse_host_list(&entries(&[":80"]), DeviceKind::Plug).is_err());
    }

    #[test]
    fn test_load_tags_each_family() {
        let hosts = HostsConfig {
            plug: entries(&["10.0.0.1"]),
            plus: entries(&["10.0.0.2"]),
            pro: vec![],
            em3: entries(&["10.0.0.3"]),
        };

        let targets = load(&hosts).unwrap();
        let kinds: Vec<_> = targets.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![DeviceKind::Plug, DeviceKind::Plus, DeviceKind::Em3]);
    }
}
