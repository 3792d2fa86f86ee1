//! Public handle: permissions, broadcasts, inet condition, proxy, DNS and
//! policy.

mod common;

use common::{drain, kinds, link, Harness};
use connectivityd::{Broadcast, Caller, ChangeKind, ConnectivityError, Permission, RULE_REJECT_METERED};
use conn_types::{DetailedState, LinkProperties, NetworkType, ProxyInfo};
use pretty_assertions::assert_eq;
use std::net::IpAddr;
use std::time::Duration;

fn denied(result: connectivityd::Result<impl std::fmt::Debug>, wanted: Permission) {
    match result {
        Err(ConnectivityError::PermissionDenied { permission, .. }) => assert_eq!(permission, wanted),
        other => panic!("expected {} to be denied, got {:?}", wanted, other),
    }
}

fn inet_conditions(broadcasts: &[Broadcast]) -> Vec<u8> {
    broadcasts
        .iter()
        .filter_map(|b| match b {
            Broadcast::InetConditionChanged { inet_condition, .. } => Some(*inet_condition),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_permissions_enforced_before_queueing() {
    let h = Harness::start();
    let nobody = Caller::new(300, 10003);
    let app = Caller::app(100, 10001);

    denied(h.handle.active_network_info(&nobody), Permission::AccessNetworkState);
    denied(h.handle.all_network_info(&nobody), Permission::AccessNetworkState);
    denied(
        h.handle.set_network_preference(&nobody, NetworkType::Mobile),
        Permission::ChangeNetworkState,
    );
    denied(
        h.handle
            .request_route_to_host_address(&nobody, NetworkType::Wifi, &[8, 8, 8, 8])
            .await,
        Permission::ChangeNetworkState,
    );
    denied(
        h.handle.set_global_proxy(&app, Some(ProxyInfo::new("proxy", 3128))),
        Permission::ConnectivityInternal,
    );
    denied(h.handle.set_dns_override(&app, None), Permission::ConnectivityInternal);
    denied(
        h.handle.set_policy_data_enable(&app, NetworkType::Mobile, false),
        Permission::ConnectivityInternal,
    );
    denied(
        h.handle.report_inet_condition(&app, NetworkType::Wifi, 100),
        Permission::StatusBar,
    );

    // Nothing was changed behind the denials
    let dump = h.settle().await;
    assert_eq!(dump.network_preference, NetworkType::Wifi);
    assert_eq!(dump.proxy.global_proxy, None);
    assert_eq!(h.handle.all_network_info(&app).unwrap().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_sticky_connectivity_replayed_to_late_subscriber() {
    let h = Harness::start();
    h.connect(NetworkType::Wifi, "wlan0").await;

    let mut late = h.handle.subscribe();
    assert_eq!(
        kinds(&drain(&mut late)),
        vec![(ChangeKind::Connected, NetworkType::Wifi)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_initial_broadcast_resent_on_system_ready() {
    let h = Harness::start();
    let mut rx = h.handle.subscribe();
    h.connect(NetworkType::Wifi, "wlan0").await;
    assert_eq!(drain(&mut rx).len(), 1);

    h.handle.system_ready().unwrap();
    h.settle().await;
    assert_eq!(
        kinds(&drain(&mut rx)),
        vec![(ChangeKind::Connected, NetworkType::Wifi)]
    );

    h.handle.system_ready().unwrap();
    h.settle().await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_inet_condition_is_debounced() {
    let h = Harness::start();
    let status_bar = Caller::new(1, 1000).with(Permission::StatusBar);
    h.connect(NetworkType::Wifi, "wlan0").await;
    let mut rx = h.handle.subscribe();
    drain(&mut rx);

    h.handle
        .report_inet_condition(&status_bar, NetworkType::Wifi, 100)
        .unwrap();
    let dump = h.settle().await;
    assert!(dump.inet_condition.in_flight);
    assert_eq!(dump.inet_condition.published, 0);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.settle().await.inet_condition.published, 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let dump = h.settle().await;
    assert_eq!(dump.inet_condition.published, 100);
    assert!(!dump.inet_condition.in_flight);
    assert_eq!(inet_conditions(&drain(&mut rx)), vec![100]);

    // Degrading reports are held longer; the hold publishes the latest value
    h.handle
        .report_inet_condition(&status_bar, NetworkType::Wifi, 20)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    h.handle
        .report_inet_condition(&status_bar, NetworkType::Wifi, 0)
        .unwrap();
    assert_eq!(h.settle().await.inet_condition.published, 100);
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(h.settle().await.inet_condition.published, 0);
    assert_eq!(inet_conditions(&drain(&mut rx)), vec![0]);

    // Only the active default network counts
    h.handle
        .report_inet_condition(&status_bar, NetworkType::Mobile, 100)
        .unwrap();
    assert!(!h.settle().await.inet_condition.in_flight);
}

#[tokio::test(start_paused = true)]
async fn test_new_default_connection_cancels_inet_hold() {
    let h = Harness::start();
    let status_bar = Caller::system(1);
    h.connect(NetworkType::Mobile, "wwan0").await;
    h.handle
        .report_inet_condition(&status_bar, NetworkType::Mobile, 100)
        .unwrap();
    assert!(h.settle().await.inet_condition.in_flight);

    // Wifi is the preference and replaces mobile
    h.connect(NetworkType::Wifi, "wlan0").await;
    let dump = h.settle().await;
    assert_eq!(dump.active_default, Some(NetworkType::Wifi));
    assert!(!dump.inet_condition.in_flight);
    assert_eq!(dump.inet_condition.default_connection_sequence, 2);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.settle().await.inet_condition.published, 0);
}

#[tokio::test(start_paused = true)]
async fn test_global_proxy_masks_default_proxy() {
    let h = Harness::start();
    let system = Caller::system(1);
    let mut rx = h.handle.subscribe();

    let link_proxy = ProxyInfo::new("proxy.lan", 3128);
    let mut lp = link("wlan0");
    lp.http_proxy = Some(link_proxy.clone());
    let wifi = h.driver(NetworkType::Wifi);
    wifi.set_available(true);
    wifi.connected(lp);
    h.settle().await;
    assert_eq!(h.handle.proxy(&system).unwrap(), Some(link_proxy.clone()));

    let global = ProxyInfo::new("global.example", 8080);
    h.handle.set_global_proxy(&system, Some(global.clone())).unwrap();
    h.settle().await;
    assert_eq!(h.handle.proxy(&system).unwrap(), Some(global.clone()));
    assert_eq!(h.handle.global_proxy(&system).unwrap(), Some(global.clone()));

    // An empty host clears the global proxy
    h.handle
        .set_global_proxy(&system, Some(ProxyInfo::new("", 0)))
        .unwrap();
    h.settle().await;
    assert_eq!(h.handle.global_proxy(&system).unwrap(), None);

    wifi.disconnected(None);
    h.settle().await;
    assert_eq!(h.handle.proxy(&system).unwrap(), None);

    let proxies: Vec<Option<ProxyInfo>> = drain(&mut rx)
        .into_iter()
        .filter_map(|b| match b {
            Broadcast::ProxyChanged { proxy } => Some(proxy),
            _ => None,
        })
        .collect();
    assert_eq!(
        proxies,
        vec![Some(link_proxy.clone()), Some(global), Some(link_proxy), None]
    );
}

#[tokio::test(start_paused = true)]
async fn test_global_proxy_ordered_with_link_changes() {
    let h = Harness::start();
    let system = Caller::system(1);
    let global = ProxyInfo::new("global.example", 8080);

    // Queued behind the connect, so the global proxy is announced last
    let mut lp = link("wlan0");
    lp.http_proxy = Some(ProxyInfo::new("proxy.lan", 3128));
    let wifi = h.driver(NetworkType::Wifi);
    wifi.set_available(true);
    wifi.connected(lp);
    h.handle.set_global_proxy(&system, Some(global.clone())).unwrap();
    h.settle().await;

    assert_eq!(h.handle.proxy(&system).unwrap(), Some(global.clone()));
    let replayed: Vec<Option<ProxyInfo>> = drain(&mut h.handle.subscribe())
        .into_iter()
        .filter_map(|b| match b {
            Broadcast::ProxyChanged { proxy } => Some(proxy),
            _ => None,
        })
        .collect();
    assert_eq!(replayed, vec![Some(global)]);
}

#[tokio::test(start_paused = true)]
async fn test_dns_override_pins_resolvers() {
    let h = Harness::start();
    let system = Caller::system(1);
    h.connect(NetworkType::Wifi, "wlan0").await;

    let pinned: Vec<IpAddr> = vec!["10.0.0.1".parse().unwrap()];
    h.handle.set_dns_override(&system, Some(pinned.clone())).unwrap();
    let dump = h.settle().await;
    assert!(dump.dns.overridden);
    assert_eq!(dump.dns.servers, pinned);
    assert_eq!(dump.dns.default_interface.as_deref(), Some("wlan0"));

    // Link updates do not touch pinned resolvers
    let mut lp = link("wlan0");
    lp.dns_servers = vec!["9.9.9.9".parse().unwrap()];
    h.driver(NetworkType::Wifi).update_link_properties(lp.clone());
    assert_eq!(h.settle().await.dns.servers, pinned);

    h.handle.set_dns_override(&system, None).unwrap();
    let dump = h.settle().await;
    assert!(!dump.dns.overridden);
    assert_eq!(dump.dns.servers, lp.dns_servers);
}

#[tokio::test(start_paused = true)]
async fn test_default_network_without_resolvers_uses_fallback() {
    let h = Harness::start();
    let mut lp = link("eth0");
    lp.dns_servers.clear();
    let eth = h.driver(NetworkType::Ethernet);
    eth.set_available(true);
    eth.connected(lp);

    let dump = h.settle().await;
    assert_eq!(dump.dns.servers, vec!["8.8.8.8".parse::<IpAddr>().unwrap()]);
    assert_eq!(dump.dns.num_entries, 1);
    assert_eq!(dump.dns.change_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_uid_sees_blocked_state() {
    let h = Harness::start();
    h.connect(NetworkType::Wifi, "wlan0").await;
    let policy = h.handle.policy_observer();
    policy.on_metered_ifaces_changed(vec!["wlan0".to_string()]);
    policy.on_uid_rules_changed(10001, RULE_REJECT_METERED);

    let blocked = Caller::app(100, 10001);
    let other = Caller::app(200, 10002);
    let info = h.handle.active_network_info(&blocked).unwrap().unwrap();
    assert_eq!(info.detailed_state(), DetailedState::Blocked);
    let info = h.handle.active_network_info(&other).unwrap().unwrap();
    assert_eq!(info.detailed_state(), DetailedState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_restrict_background_reannounces_default() {
    let h = Harness::start();
    h.connect(NetworkType::Wifi, "wlan0").await;
    let mut rx = h.handle.subscribe();
    drain(&mut rx);

    let policy = h.handle.policy_observer();
    policy.on_restrict_background_changed(true);
    // Unchanged: nothing to announce
    policy.on_restrict_background_changed(true);
    h.settle().await;
    assert_eq!(
        kinds(&drain(&mut rx)),
        vec![(ChangeKind::Connected, NetworkType::Wifi)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_mobile_data_disabled_skips_mobile_failover() {
    let mut config = common::config();
    config.daemon.mobile_data_enabled = false;
    let h = Harness::with_config(config);
    let app = Caller::app(100, 10001);
    assert!(!h.handle.mobile_data_enabled(&app).unwrap());

    h.connect(NetworkType::Wifi, "wlan0").await;
    let mobile = h.driver(NetworkType::Mobile);
    mobile.set_available(true);
    h.driver(NetworkType::Wifi).disconnected(None);
    h.settle().await;
    assert_eq!(mobile.info().detailed_state(), DetailedState::Idle);

    h.handle.set_mobile_data_enabled(&app, true).unwrap();
    h.settle().await;
    assert!(h.handle.mobile_data_enabled(&app).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_service() {
    let h = Harness::start();
    let handle = h.handle.clone();
    let driver = h.driver(NetworkType::Wifi);
    h.service.shutdown().await.unwrap();

    assert!(!handle.is_running());
    assert!(matches!(handle.dump().await, Err(ConnectivityError::ServiceStopped)));
    // Drivers keep working; events are simply dropped
    driver.set_available(true);
    driver.connected(LinkProperties::new("wlan0"));
}
