use std::collections::HashMap;
use chrono::Utc;
use shared::types::{TargetRecord, TARGET_HEALTH_DEAD, TARGET_HEALTH_GOOD, TARGET_HEALTH_LOW};

/// The target directory state: address -> record.
/// Owned by exactly one thread; see `directory_manager` for the shared handle.
pub struct TargetTable {
    targets: HashMap<String, TargetRecord>,
    static_targets: Vec<TargetRecord>,
}

impl TargetTable {
    /// Create a table seeded with the static targets
    pub fn new(static_targets: Vec<TargetRecord>) -> Self {
        let mut table = Self {
            targets: HashMap::new(),
            static_targets,
        };
        for target in table.static_targets.clone() {
            table.upsert_observed(target);
        }
        table
    }

    /// Apply one discovery round.
    ///
    /// Every present target decays first (above LOW clamps to LOW, otherwise
    /// loses one point), then static and discovered targets are written back
    /// at full health, then dead targets are evicted.
    pub fn merge(&mut self, discovered: Vec<TargetRecord>) {
        for target in self.targets.values_mut() {
            if target.health > TARGET_HEALTH_LOW {
                target.health = TARGET_HEALTH_LOW;
            } else {
                target.health = target.health.saturating_sub(1);
            }
        }

        // A discovered device that is also configured statically stays static
        let observed: Vec<TargetRecord> = self
            .static_targets
            .iter()
            .cloned()
            .chain(discovered.into_iter().filter(|target| !self.is_static(&target.address)))
            .collect();

        for target in observed {
            self.upsert_observed(target);
        }

        self.evict_dead();
    }

    /// Health feedback from a consumer. Static and unknown targets are left untouched.
    /// Returns true if the target was known and dynamic.
    pub fn mark_target(&mut self, address: &str, healthy: bool) -> bool {
        let applied = match self.targets.get_mut(address) {
            Some(target) if target.is_static => false,
            Some(target) => {
                if healthy {
                    target.health = TARGET_HEALTH_GOOD;
                } else {
                    target.health = target.health.saturating_sub(1);
                }
                true
            }
            None => {
                tracing::debug!("Ignoring health mark for unknown target {}", address);
                false
            }
        };

        self.evict_dead();
        applied
    }

    /// Annotate a known target with its self-reported name.
    /// Returns true if the stored name changed.
    pub fn set_device_name(&mut self, address: &str, name: &str) -> bool {
        match self.targets.get_mut(address) {
            Some(target) if target.device_name.as_deref() != Some(name) => {
                target.device_name = Some(name.to_string());
                true
            }
            _ => false,
        }
    }

    /// Snapshot copy of all targets, in no particular order
    pub fn get_targets(&self) -> Vec<TargetRecord> {
        self.targets.values().cloned().collect()
    }

    #[cfg(test)]
    pub fn get_target(&self, address: &str) -> Option<&TargetRecord> {
        self.targets.get(address)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    fn is_static(&self, address: &str) -> bool {
        self.static_targets.iter().any(|target| target.address == address)
    }

    fn upsert_observed(&mut self, mut target: TargetRecord) {
        target.health = TARGET_HEALTH_GOOD;
        target.last_seen = Some(Utc::now());

        // The device name is learned by probing, not by discovery; keep it across rounds
        if target.device_name.is_none() {
            if let Some(existing) = self.targets.get(&target.address) {
                target.device_name = existing.device_name.clone();
            }
        }

        self.targets.insert(target.address.clone(), target);
    }

    fn evict_dead(&mut self) {
        self.targets.retain(|address, target| {
            let alive = target.is_static || target.health > TARGET_HEALTH_DEAD;
            if !alive {
                tracing::debug!("Evicting unhealthy target {} ({})", target.name(), address);
            }
            alive
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use shared::types::DeviceKind;

    fn dynamic(address: &str) -> TargetRecord {
        let mut target = TargetRecord::new(address, 80, DeviceKind::Plus);
        target.hostname = format!("shellyplus1pm-{}", address);
        target
    }

    fn static_target(address: &str) -> TargetRecord {
        let mut target = TargetRecord::new(address, 80, DeviceKind::Plug);
        target.is_static = true;
        target
    }

    fn health_of(table: &TargetTable, address: &str) -> Option<u8> {
        table.get_target(address).map(|t| t.health)
    }

    #[test]
    fn test_static_target_after_empty_round() {
        let mut table = TargetTable::new(vec![static_target("10.0.0.5")]);
        table.merge(vec![]);

        let targets = table.get_targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].address, "10.0.0.5");
        assert_eq!(targets[0].port, 80);
        assert!(targets[0].is_static);
        assert_eq!(targets[0].health, 10);
    }

    #[test]
    fn test_static_targets_visible_before_first_round() {
        let table = TargetTable::new(vec![static_target("10.0.0.5")]);
        assert_eq!(health_of(&table, "10.0.0.5"), Some(TARGET_HEALTH_GOOD));
    }

    #[test]
    fn test_decay_sequence_and_eviction() {
        let mut table = TargetTable::new(vec![]);
        table.merge(vec![dynamic("10.0.0.7")]);
        assert_eq!(health_of(&table, "10.0.0.7"), Some(10));

        table.merge(vec![]);
        assert_eq!(health_of(&table, "10.0.0.7"), Some(2));

        table.merge(vec![]);
        assert_eq!(health_of(&table, "10.0.0.7"), Some(1));

        table.merge(vec![]);
        assert_eq!(health_of(&table, "10.0.0.7"), None);
        assert!(table.get_targets().is_empty());
    }

    #[test]
    fn test_single_missed_round_only_clamps_to_low() {
        let mut table = TargetTable::new(vec![]);
        table.merge(vec![dynamic("10.0.0.7")]);
        table.merge(vec![]);

        assert_eq!(health_of(&table, "10.0.0.7"), Some(TARGET_HEALTH_LOW));
    }

    #[test]
    fn test_rediscovery_resets_health() {
        let mut table = TargetTable::new(vec![]);
        table.merge(vec![dynamic("10.0.0.7")]);
        table.merge(vec![]);
        table.merge(vec![]);
        assert_eq!(health_of(&table, "10.0.0.7"), Some(1));

        table.merge(vec![dynamic("10.0.0.7")]);
        assert_eq!(health_of(&table, "10.0.0.7"), Some(TARGET_HEALTH_GOOD));
    }

    #[test]
    fn test_eventually_evicts_any_dynamic_target() {
        let mut table = TargetTable::new(vec![static_target("10.0.0.5")]);
        table.merge(vec![dynamic("10.0.0.7"), dynamic("10.0.0.8")]);

        for _ in 0..=TARGET_HEALTH_LOW {
            table.merge(vec![]);
        }

        let addresses: Vec<_> = table.get_targets().into_iter().map(|t| t.address).collect();
        assert_eq!(addresses, vec!["10.0.0.5".to_string()]);
    }

    #[test]
    fn test_static_immune_to_failure_marks() {
        let mut table = TargetTable::new(vec![static_target("10.0.0.5")]);

        for _ in 0..50 {
            assert!(!table.mark_target("10.0.0.5", false));
        }
        table.merge(vec![]);

        assert_eq!(health_of(&table, "10.0.0.5"), Some(TARGET_HEALTH_GOOD));
    }

    #[test]
    fn test_mark_dynamic_target() {
        let mut table = TargetTable::new(vec![]);
        table.merge(vec![dynamic("10.0.0.7")]);

        assert!(table.mark_target("10.0.0.7", false));
        assert_eq!(health_of(&table, "10.0.0.7"), Some(9));

        assert!(table.mark_target("10.0.0.7", true));
        assert_eq!(health_of(&table, "10.0.0.7"), Some(10));
    }

    #[test]
    fn test_failure_marks_evict_at_zero() {
        let mut table = TargetTable::new(vec![]);
        table.merge(vec![dynamic("10.0.0.7")]);
        table.merge(vec![]);

        table.mark_target("10.0.0.7", false);
        assert_eq!(health_of(&table, "10.0.0.7"), Some(1));

        table.mark_target("10.0.0.7", false);
        assert_eq!(health_of(&table, "10.0.0.7"), None);
    }

    #[test]
    fn test_mark_unknown_target_is_inert() {
        let mut table = TargetTable::new(vec![static_target("10.0.0.5")]);
        let before = table.get_targets();

        assert!(!table.mark_target("1.2.3.4", true));
        assert!(!table.mark_target("1.2.3.4", false));

        assert_eq!(table.get_targets(), before);
        assert!(table.get_target("1.2.3.4").is_none());
    }

    #[test]
    fn test_addresses_stay_unique() {
        let mut table = TargetTable::new(vec![static_target("10.0.0.5")]);
        let mut duplicate = dynamic("10.0.0.7");
        duplicate.port = 8080;

        table.merge(vec![dynamic("10.0.0.7"), duplicate, dynamic("10.0.0.5")]);
        table.merge(vec![dynamic("10.0.0.7")]);

        let targets = table.get_targets();
        let unique: HashSet<_> = targets.iter().map(|t| t.address.clone()).collect();
        assert_eq!(unique.len(), targets.len());
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_static_wins_over_discovered_duplicate() {
        let mut table = TargetTable::new(vec![static_target("10.0.0.5")]);
        table.merge(vec![dynamic("10.0.0.5")]);

        let target = table.get_target("10.0.0.5").unwrap();
        assert!(target.is_static);
        assert_eq!(target.kind, DeviceKind::Plug);

        table.mark_target("10.0.0.5", false);
        assert_eq!(health_of(&table, "10.0.0.5"), Some(TARGET_HEALTH_GOOD));
    }

    #[test]
    fn test_device_name_survives_rediscovery() {
        let mut table = TargetTable::new(vec![]);
        table.merge(vec![dynamic("10.0.0.7")]);

        assert!(table.set_device_name("10.0.0.7", "Kitchen"));
        assert!(!table.set_device_name("10.0.0.7", "Kitchen"));
        assert!(!table.set_device_name("10.9.9.9", "Nowhere"));

        table.merge(vec![dynamic("10.0.0.7")]);
        let target = table.get_target("10.0.0.7").unwrap();
        assert_eq!(target.device_name.as_deref(), Some("Kitchen"));
    }
}
