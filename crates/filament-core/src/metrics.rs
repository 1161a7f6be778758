//! Fabric metrics on the default prometheus registry.

use std::sync::OnceLock;

use prometheus::{opts, register_int_gauge_vec, IntGaugeVec};

/// Live channels per server, labelled by service id and name.
#[allow(clippy::expect_used)]
pub fn channel_gauge() -> &'static IntGaugeVec {
    static GAUGE: OnceLock<IntGaugeVec> = OnceLock::new();

    GAUGE.get_or_init(|| {
        register_int_gauge_vec!(
            opts!("filament_channel_total", "live channels on this server"),
            &["service_id", "service_name"]
        )
        .expect("channel gauge registration")
    })
}
