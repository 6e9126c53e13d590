use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{DeviceKind, TargetRecord};

/// Only identity and metadata fields; health and last_seen move on every
/// round without the target set itself changing.
#[derive(Serialize)]
struct FingerprintView<'a> {
    address: &'a str,
    port: u16,
    hostname: &'a str,
    kind: DeviceKind,
    generation: Option<&'a str>,
    version: Option<&'a str>,
    is_static: bool,
    device_name: Option<&'a str>,
}

/// SHA-256 over the target set, independent of input order.
pub fn compute_fingerprint(targets: &[TargetRecord]) -> String {
    let mut indices: Vec<usize> = (0..targets.len()).collect();
    indices.sort_by(|&a, &b| targets[a].address.cmp(&targets[b].address));

    let mut hasher = Sha256::new();
    for &i in &indices {
        let t = &targets[i];
        let view = FingerprintView {
            address: &t.address,
            port: t.port,
            hostname: &t.hostname,
            kind: t.kind,
            generation: t.generation.as_deref(),
            version: t.version.as_deref(),
            is_static: t.is_static,
            device_name: t.device_name.as_deref(),
        };

        // Serializing plain strings, integers and options cannot fail
        if let Ok(json) = serde_json::to_vec(&view) {
            hasher.update(&json);
            hasher.update(b"\n");
        }
    }

    hex::encode(hasher.finalize())
}
