use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::FleetError;

const SUBNET_PREFIX: &str = "192.168.179";
/// Ordinal 255 would map to `.0`.
const MAX_ORDINAL: u32 = 254;

/// One logical VM and the identity it was assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    logical_name: String,
    canonical_name: String,
    internal_ip: String,
    #[serde(default)]
    box_name: Option<String>,
    #[serde(default)]
    forward_ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn internal_ip(&self) -> &str {
        &self.internal_ip
    }

    pub fn box_name(&self) -> Option<&str> {
        self.box_name.as_deref()
    }

    pub fn forward_ports(&self) -> &[u16] {
        &self.forward_ports
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// The box is fixed once set; later values are ignored. Returns whether it was set now.
    pub fn set_box_if_absent(&mut self, box_name: &str) -> bool {
        if self.box_name.is_some() {
            return false;
        }
        self.box_name = Some(box_name.to_string());
        true
    }

    /// Replaces the forwarded ports wholesale. Returns whether they differ from before.
    pub fn replace_forward_ports(&mut self, ports: &[u16]) -> bool {
        if self.forward_ports == ports {
            return false;
        }
        self.forward_ports = ports.to_vec();
        true
    }
}

/// Every instance in a working directory plus the allocation counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    instance_count: u32,
    #[serde(default)]
    instances: BTreeMap<String, Instance>,
}

impl Registry {
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn get(&self, logical_name: &str) -> Option<&Instance> {
        self.instances.get(logical_name)
    }

    pub fn contains(&self, logical_name: &str) -> bool {
        self.instances.contains_key(logical_name)
    }

    /// Instances ordered by logical name.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_count == 0
    }

    /// Returns the registered instance, allocating identity for a new name.
    /// The flag is `true` when the instance was created by this call.
    pub fn get_or_create(&mut self, logical_name: &str) -> Result<(&mut Instance, bool), FleetError> {
        if self.instances.contains_key(logical_name) {
            let instance = self
                .instances
                .get_mut(logical_name)
                .ok_or_else(|| FleetError::Config(format!("instance '{logical_name}' vanished")))?;
            return Ok((instance, false));
        }

        let count = self.instance_count + 1;
        let ordinal = self.free_ordinal(count).ok_or_else(|| {
            FleetError::Config(format!(
                "address pool exhausted: at most {MAX_ORDINAL} instances per working directory"
            ))
        })?;
        let instance = Instance {
            logical_name: logical_name.to_string(),
            canonical_name: canonical_name(logical_name),
            internal_ip: ip_for_ordinal(ordinal),
            box_name: None,
            forward_ports: Vec::new(),
            created_at: Some(Utc::now()),
        };
        tracing::debug!(
            name = logical_name,
            ip = %instance.internal_ip,
            "allocated instance"
        );
        self.instance_count = count;
        let slot = self
            .instances
            .entry(logical_name.to_string())
            .or_insert(instance);
        Ok((slot, true))
    }

    /// Drops the instance if registered. Absent names are not an error.
    pub fn remove(&mut self, logical_name: &str) -> Option<Instance> {
        let removed = self.instances.remove(logical_name)?;
        self.instance_count = self.instance_count.saturating_sub(1);
        Some(removed)
    }

    /// `count` maps to `.(255 - count)`. After removals that address can still
    /// be held by a survivor, in which case the next free ordinal is used.
    fn free_ordinal(&self, count: u32) -> Option<u32> {
        let taken = |ordinal: u32| {
            let ip = ip_for_ordinal(ordinal);
            self.instances.values().any(|inst| inst.internal_ip == ip)
        };
        (count..=MAX_ORDINAL)
            .chain(1..count.min(MAX_ORDINAL + 1))
            .find(|ordinal| !taken(*ordinal))
    }
}

/// Vagrant rejects hyphens in machine labels.
pub fn canonical_name(logical_name: &str) -> String {
    logical_name.replace('-', "_")
}

fn ip_for_ordinal(ordinal: u32) -> String {
    format!("{SUBNET_PREFIX}.{}", 255 - ordinal)
}
