//! Zone-aware weighted selection.
//!
//! Routing order: app whitelist pin → weighted zone table → in-zone
//! consistent hash. A packet without `app`/`account` meta, or a zone with
//! no live instance, degrades to a uniform pick over the full candidate
//! set; the latter case is surfaced on a counter for operations.

use std::{collections::HashMap, path::Path, sync::Arc, sync::OnceLock};

use filament_core::Service;
use filament_proto::{meta_keys, Header};
use prometheus::{opts, register_int_counter_vec, IntCounterVec};
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{hash_code, Selector};
use crate::ContainerError;

/// How many slots each in-zone candidate occupies; oversampling smooths
/// the hash distribution over small candidate sets.
const ZONE_SLOT_FACTOR: usize = 10;

/// A zone with its traffic weight.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Zone {
    /// Zone id matched against the `zone` service meta.
    pub id: String,
    /// Relative share of slot-table positions.
    pub weight: usize,
}

#[derive(Debug, Deserialize)]
struct WhitelistEntry {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct RouteConfig {
    route_by: String,
    zones: Vec<Zone>,
    #[serde(default)]
    whitelist: Vec<WhitelistEntry>,
}

/// The static routing table behind a [`RouteSelector`].
///
/// The slot table is pre-expanded at construction: zone *i* occupies
/// `weight(i)` positions, so zone selection is one hash and one index.
#[derive(Debug, Clone)]
pub struct RouteTable {
    route_by: String,
    zones: Vec<Zone>,
    whitelist: HashMap<String, String>,
    slots: Vec<usize>,
}

impl RouteTable {
    /// Build a table. The total weight must be positive.
    pub fn new(
        route_by: impl Into<String>,
        zones: Vec<Zone>,
        whitelist: HashMap<String, String>,
    ) -> Result<Self, ContainerError> {
        let mut slots = Vec::with_capacity(zones.iter().map(|z| z.weight).sum());

        for (i, zone) in zones.iter().enumerate() {
            slots.extend(std::iter::repeat_n(i, zone.weight));
        }

        if slots.is_empty() {
            return Err(ContainerError::RouteTable("total zone weight is zero".into()));
        }

        Ok(Self { route_by: route_by.into(), zones, whitelist, slots })
    }

    /// Parse the JSON config format:
    /// `{"route_by": "...", "zones": [{"id", "weight"}], "whitelist": [{"key", "value"}]}`.
    pub fn from_json(raw: &str) -> Result<Self, ContainerError> {
        let config: RouteConfig =
            serde_json::from_str(raw).map_err(|e| ContainerError::RouteTable(e.to_string()))?;

        let whitelist = config
            .whitelist
            .into_iter()
            .map(|entry| (entry.key, entry.value))
            .collect();

        Self::new(config.route_by, config.zones, whitelist)
    }

    /// Read [`RouteTable::from_json`] input from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ContainerError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ContainerError::RouteTable(e.to_string()))?;

        Self::from_json(&raw)
    }

    fn zone_for(&self, app: &str, account: &str) -> (String, bool) {
        if let Some(zone) = self.whitelist.get(app) {
            return (zone.clone(), true);
        }

        let key = match self.route_by.as_str() {
            meta_keys::APP => app,
            _ => account,
        };

        let slot = hash_code(key) as usize % self.slots.len();

        (self.zones[self.slots[slot]].id.clone(), false)
    }
}

#[allow(clippy::expect_used)]
fn fallback_counter() -> &'static IntCounterVec {
    static COUNTER: OnceLock<IntCounterVec> = OnceLock::new();

    COUNTER.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "filament_route_zone_fallback_total",
                "selections that fell back to a random instance because the zone was empty"
            ),
            &["zone"]
        )
        .expect("fallback counter registration")
    })
}

fn random_pick(services: &[Arc<dyn Service>]) -> Option<String> {
    if services.is_empty() {
        return None;
    }

    let idx = rand::thread_rng().gen_range(0..services.len());

    Some(services[idx].service_id().to_owned())
}

/// Weighted, zone-pinning selector for gateway → logic traffic.
pub struct RouteSelector {
    table: RouteTable,
}

impl RouteSelector {
    /// A selector over `table`.
    pub fn new(table: RouteTable) -> Self {
        Self { table }
    }

    fn select_in_zone(account: &str, services: &[Arc<dyn Service>]) -> Option<String> {
        if services.is_empty() {
            return None;
        }

        let mut ids: Vec<&str> = services.iter().map(|s| s.service_id()).collect();
        ids.sort_unstable();

        let mut slots = Vec::with_capacity(ids.len() * ZONE_SLOT_FACTOR);
        for i in 0..ids.len() {
            slots.extend(std::iter::repeat_n(i, ZONE_SLOT_FACTOR));
        }

        let slot = hash_code(account) as usize % slots.len();

        Some(ids[slots[slot]].to_owned())
    }
}

impl Selector for RouteSelector {
    fn lookup(&self, header: &Header, services: &[Arc<dyn Service>]) -> Option<String> {
        let app = header.get_string_meta(meta_keys::APP);
        let account = header.get_string_meta(meta_keys::ACCOUNT);

        let (Some(app), Some(account)) = (app, account) else {
            return random_pick(services);
        };

        let (zone, whitelisted) = self.table.zone_for(app, account);
        debug!(app, account, zone, whitelisted, "zone selected");

        let in_zone: Vec<Arc<dyn Service>> = services
            .iter()
            .filter(|s| s.meta().get(meta_keys::ZONE).map(String::as_str) == Some(zone.as_str()))
            .map(Arc::clone)
            .collect();

        if in_zone.is_empty() {
            fallback_counter().with_label_values(&[zone.as_str()]).inc();
            warn!(zone, "no service in zone, falling back to a random instance");

            return random_pick(services);
        }

        Self::select_in_zone(account, &in_zone)
    }
}

#[cfg(test)]
mod tests {
    use filament_core::{Client, ClientOptions};

    use super::*;

    fn zoned(id: &str, zone: &str) -> Arc<dyn Service> {
        let client = Client::new(id, "chat", ClientOptions::default());
        client.set_meta(meta_keys::ZONE, zone);

        client as Arc<dyn Service>
    }

    fn header(app: &str, account: &str) -> Header {
        let mut header = Header { channel_id: "c1".into(), ..Default::default() };
        header.add_string_meta(meta_keys::APP, app);
        header.add_string_meta(meta_keys::ACCOUNT, account);

        header
    }

    fn table() -> RouteTable {
        RouteTable::new(
            meta_keys::ACCOUNT,
            vec![
                Zone { id: "z1".into(), weight: 2 },
                Zone { id: "z2".into(), weight: 1 },
            ],
            HashMap::from([("vip_app".to_owned(), "z2".to_owned())]),
        )
        .unwrap()
    }

    #[test]
    fn whitelisted_app_pins_the_zone() {
        let selector = RouteSelector::new(table());
        let services =
            vec![zoned("s1", "z1"), zoned("s2", "z2"), zoned("s3", "z2"), zoned("s4", "z1")];

        for i in 0..32 {
            let picked = selector
                .lookup(&header("vip_app", &format!("acc{i}")), &services)
                .unwrap();

            assert!(picked == "s2" || picked == "s3", "whitelisted app must stay in z2");
        }
    }

    #[test]
    fn missing_meta_still_selects_something() {
        let selector = RouteSelector::new(table());
        let services = vec![zoned("s1", "z1"), zoned("s2", "z2")];

        let bare = Header::default();
        let picked = selector.lookup(&bare, &services).unwrap();

        assert!(picked == "s1" || picked == "s2");
    }

    #[test]
    fn empty_zone_falls_back_and_counts() {
        let selector = RouteSelector::new(RouteTable::new(
            meta_keys::ACCOUNT,
            vec![Zone { id: "z9".into(), weight: 1 }],
            HashMap::new(),
        )
        .unwrap());

        let services = vec![zoned("s1", "z1"), zoned("s2", "z1")];
        let before = fallback_counter().with_label_values(&["z9"]).get();

        let picked = selector.lookup(&header("app", "u1"), &services).unwrap();
        assert!(picked == "s1" || picked == "s2");

        let after = fallback_counter().with_label_values(&["z9"]).get();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn in_zone_pick_is_account_sticky() {
        let selector = RouteSelector::new(table());
        let services =
            vec![zoned("s1", "z1"), zoned("s2", "z1"), zoned("s3", "z1"), zoned("s4", "z2")];

        let first = selector.lookup(&header("app", "sticky"), &services).unwrap();
        for _ in 0..16 {
            assert_eq!(selector.lookup(&header("app", "sticky"), &services).unwrap(), first);
        }
    }

    #[test]
    fn config_round_trip() {
        let raw = r#"{
            "route_by": "account",
            "zones": [
                {"id": "z1", "weight": 80},
                {"id": "z2", "weight": 20}
            ],
            "whitelist": [
                {"key": "vip_app", "value": "z2"}
            ]
        }"#;

        let selector = RouteSelector::new(RouteTable::from_json(raw).unwrap());
        let services = vec![zoned("s1", "z1"), zoned("s2", "z2")];

        for i in 0..16 {
            assert!(selector.lookup(&header("app", &format!("u{i}")), &services).is_some());
        }
    }

    #[test]
    fn zero_weight_table_is_rejected() {
        let result = RouteTable::new(
            meta_keys::ACCOUNT,
            vec![Zone { id: "z1".into(), weight: 0 }],
            HashMap::new(),
        );

        assert!(result.is_err());
    }
}
