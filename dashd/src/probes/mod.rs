//! Built-in dashboard tools
//!
//! Each probe is a thin collaborator plugged into the toolbox through a
//! strategy or status source.

pub mod connectivity;
pub mod disk;

use std::sync::Arc;
use std::time::Duration;

use deskcheck_tools::{blocking_strategy, strategy_fn, MonitorSpec, Tag, Tool};

use connectivity::{InternetCheck, TrustedNetwork};

pub const LOW_WIFI_NOTIFS: &str = "low-wifi-notifs";
pub const VPN_HELPER_ROUTE: &str = "/widgets/vpn-helper";

/// Every tool the daemon registers at startup
pub fn builtin_tools() -> Vec<Tool> {
    let internet = Arc::new(InternetCheck::default());
    let details_check = internet.clone();
    let trusted = Arc::new(TrustedNetwork);
    let trusted_exec = trusted.clone();

    vec![
        Tool::executable(
            "disk-usage",
            blocking_strategy(|params| {
                let path = params.get("path").map(String::as_str).unwrap_or("/");
                disk::execute(path)
            }),
        )
        .with_display("Disk Usage", "Space used on a filesystem", "hard-drive")
        .with_tags([Tag::Device])
        .with_capture([("percent", "percent"), ("available_gb", "availableGb")])
        .with_timeout(Duration::from_secs(10)),
        Tool::executable(
            "internet-connection",
            strategy_fn(move |_| {
                let check = details_check.clone();
                async move { connectivity::internet_details(&check).await }
            }),
        )
        .with_display(
            "Internet Connection",
            "Checks the status of the internet connection",
            "globe",
        )
        .with_tags([Tag::Internet, Tag::Network])
        .with_monitor(MonitorSpec::new(internet).retry_when(InternetCheck::is_offline)),
        Tool::executable(
            "trusted-network-status",
            blocking_strategy(move |_| trusted_exec.execute()),
        )
        .with_display(
            "Trusted Network",
            "Whether the device is on a trusted corporate network (not yet supported)",
            "shield",
        )
        .with_tags([Tag::Network, Tag::IdentityServices])
        .with_monitor(MonitorSpec::new(trusted).every(Duration::from_secs(15))),
        Tool::toggle(LOW_WIFI_NOTIFS),
        Tool::utility("vpn-helper", VPN_HELPER_ROUTE),
    ]
}
