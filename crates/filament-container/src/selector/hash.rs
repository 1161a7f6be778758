//! Channel-affine consistent selection.

use std::sync::Arc;

use filament_core::Service;
use filament_proto::Header;

use super::Selector;

/// CRC32-IEEE of `key`, the hash shared by both selectors.
pub fn hash_code(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}

/// Deterministic selector: `crc32(channel_id) mod n` over the candidates
/// sorted by service id.
///
/// Sorting makes the lookup a pure function of the logical candidate set,
/// independent of pool iteration order.
pub struct HashSelector;

impl Selector for HashSelector {
    fn lookup(&self, header: &Header, services: &[Arc<dyn Service>]) -> Option<String> {
        if services.is_empty() {
            return None;
        }

        let mut ids: Vec<&str> = services.iter().map(|s| s.service_id()).collect();
        ids.sort_unstable();

        let idx = hash_code(&header.channel_id) as usize % ids.len();

        Some(ids[idx].to_owned())
    }
}
