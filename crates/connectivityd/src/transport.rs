//! Route, resolver and socket programming.
//!
//! The orchestrator talks to the OS network stack only through
//! [`NetdTransport`]. Every call may fail; callers log and carry on.

use crate::config::TransportSection;
use crate::error::TransportError;
use async_trait::async_trait;
use conn_common::shell::{self, shellquote};
use conn_types::{LinkAddress, RouteInfo};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

pub type TransportResult<T> = Result<T, TransportError>;

/// Which address families lose their sockets on a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ResetMask {
    pub ipv4: bool,
    pub ipv6: bool,
}

impl ResetMask {
    pub const NONE: ResetMask = ResetMask {
        ipv4: false,
        ipv6: false,
    };
    pub const ALL: ResetMask = ResetMask {
        ipv4: true,
        ipv6: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.ipv4 && !self.ipv6
    }

    /// Adds the family of `address` to the mask.
    pub fn include(&mut self, address: &IpAddr) {
        match address {
            IpAddr::V4(_) => self.ipv4 = true,
            IpAddr::V6(_) => self.ipv6 = true,
        }
    }

    pub fn covers(&self, address: &IpAddr) -> bool {
        match address {
            IpAddr::V4(_) => self.ipv4,
            IpAddr::V6(_) => self.ipv6,
        }
    }
}

impl fmt::Display for ResetMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.ipv4, self.ipv6) {
            (true, true) => f.write_str("all"),
            (true, false) => f.write_str("ipv4"),
            (false, true) => f.write_str("ipv6"),
            (false, false) => f.write_str("none"),
        }
    }
}

/// Commands the orchestrator issues against the network stack.
#[async_trait]
pub trait NetdTransport: Send + Sync {
    async fn add_route(&self, iface: &str, route: &RouteInfo) -> TransportResult<()>;
    async fn remove_route(&self, iface: &str, route: &RouteInfo) -> TransportResult<()>;
    async fn add_secondary_route(&self, iface: &str, route: &RouteInfo) -> TransportResult<()>;
    async fn remove_secondary_route(&self, iface: &str, route: &RouteInfo) -> TransportResult<()>;

    async fn set_dns_servers_for_interface(&self, iface: &str, servers: &[IpAddr]) -> TransportResult<()>;
    async fn set_default_interface_for_dns(&self, iface: &str) -> TransportResult<()>;
    async fn set_dns_interface_for_pid(&self, iface: &str, pid: u32) -> TransportResult<()>;
    async fn clear_dns_interface_for_pid(&self, pid: u32) -> TransportResult<()>;
    async fn flush_interface_dns_cache(&self, iface: &str) -> TransportResult<()>;

    /// Force-closes sockets bound to `addresses` in the families of `mask`.
    async fn reset_connections(
        &self,
        iface: &str,
        mask: ResetMask,
        addresses: &[LinkAddress],
    ) -> TransportResult<()>;

    async fn add_idle_timer(&self, iface: &str, timeout_secs: u64, label: &str) -> TransportResult<()>;
    async fn remove_idle_timer(&self, iface: &str, timeout_secs: u64, label: &str) -> TransportResult<()>;
}

fn family_flag(route: &RouteInfo) -> &'static str {
    if route.destination.is_ipv4() {
        "-4"
    } else {
        "-6"
    }
}

/// Builds an `ip route` command line.
pub fn build_route_cmd(
    ip_cmd: &str,
    op: &str,
    iface: &str,
    route: &RouteInfo,
    table: Option<u32>,
) -> String {
    let mut cmd = format!(
        "{} {} route {} {}",
        ip_cmd,
        family_flag(route),
        op,
        shellquote(&route.destination.to_string())
    );
    if let Some(gw) = route.next_hop() {
        cmd.push_str(&format!(" via {}", shellquote(&gw.to_string())));
    }
    cmd.push_str(&format!(" dev {}", shellquote(iface)));
    if let Some(table) = table {
        cmd.push_str(&format!(" table {}", table));
    }
    cmd
}

/// Builds the `resolvectl dns` command that sets an interface's resolvers.
pub fn build_dns_cmd(resolvectl_cmd: &str, iface: &str, servers: &[IpAddr]) -> String {
    let mut cmd = format!("{} dns {}", resolvectl_cmd, shellquote(iface));
    for server in servers {
        cmd.push(' ');
        cmd.push_str(&shellquote(&server.to_string()));
    }
    cmd
}

/// Builds an IDLETIMER rule for data-activity tracking.
pub fn build_idle_timer_cmd(
    iptables_cmd: &str,
    op: &str,
    iface: &str,
    timeout_secs: u64,
    label: &str,
) -> String {
    format!(
        "{} -t raw {} PREROUTING -i {} -j IDLETIMER --timeout {} --label {}",
        iptables_cmd,
        op,
        shellquote(iface),
        timeout_secs,
        shellquote(label)
    )
}

/// Transport that shells out to `ip`, `resolvectl`, `ss` and `iptables`.
pub struct IpCommandTransport {
    config: TransportSection,
}

impl IpCommandTransport {
    pub fn new(config: TransportSection) -> Self {
        Self { config }
    }

    async fn run(&self, cmd: String) -> TransportResult<()> {
        shell::exec_or_throw(&cmd).await?;
        Ok(())
    }

    fn pid_file(&self, pid: u32) -> PathBuf {
        self.config.pid_dns_dir.join(pid.to_string())
    }
}

#[async_trait]
impl NetdTransport for IpCommandTransport {
    async fn add_route(&self, iface: &str, route: &RouteInfo) -> TransportResult<()> {
        self.run(build_route_cmd(&self.config.ip_cmd, "add", iface, route, None))
            .await
    }

    async fn remove_route(&self, iface: &str, route: &RouteInfo) -> TransportResult<()> {
        self.run(build_route_cmd(&self.config.ip_cmd, "del", iface, route, None))
            .await
    }

    async fn add_secondary_route(&self, iface: &str, route: &RouteInfo) -> TransportResult<()> {
        let table = Some(self.config.secondary_table);
        self.run(build_route_cmd(&self.config.ip_cmd, "add", iface, route, table))
            .await
    }

    async fn remove_secondary_route(&self, iface: &str, route: &RouteInfo) -> TransportResult<()> {
        let table = Some(self.config.secondary_table);
        self.run(build_route_cmd(&self.config.ip_cmd, "del", iface, route, table))
            .await
    }

    async fn set_dns_servers_for_interface(&self, iface: &str, servers: &[IpAddr]) -> TransportResult<()> {
        self.run(build_dns_cmd(&self.config.resolvectl_cmd, iface, servers))
            .await
    }

    async fn set_default_interface_for_dns(&self, iface: &str) -> TransportResult<()> {
        self.run(format!(
            "{} domain {} \"~.\"",
            self.config.resolvectl_cmd,
            shellquote(iface)
        ))
        .await
    }

    async fn set_dns_interface_for_pid(&self, iface: &str, pid: u32) -> TransportResult<()> {
        let path = self.pid_file(pid);
        tokio::fs::create_dir_all(&self.config.pid_dns_dir)
            .await
            .map_err(|e| TransportError::Io {
                path: self.config.pid_dns_dir.clone(),
                source: e,
            })?;
        tokio::fs::write(&path, format!("{}\n", iface))
            .await
            .map_err(|e| TransportError::Io { path, source: e })
    }

    async fn clear_dns_interface_for_pid(&self, pid: u32) -> TransportResult<()> {
        let path = self.pid_file(pid);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransportError::Io { path, source: e }),
        }
    }

    async fn flush_interface_dns_cache(&self, iface: &str) -> TransportResult<()> {
        // resolved only flushes globally
        tracing::debug!(iface, "Flushing resolver cache");
        self.run(format!("{} flush-caches", self.config.resolvectl_cmd))
            .await
    }

    async fn reset_connections(
        &self,
        iface: &str,
        mask: ResetMask,
        addresses: &[LinkAddress],
    ) -> TransportResult<()> {
        let mut last_err = None;
        for addr in addresses.iter().filter(|a| mask.covers(&a.address)) {
            let family = if addr.is_ipv4() { "-4" } else { "-6" };
            let cmd = format!(
                "{} -K {} src {}",
                self.config.ss_cmd,
                family,
                shellquote(&addr.address.to_string())
            );
            if let Err(e) = self.run(cmd).await {
                tracing::warn!(iface, address = %addr, error = %e, "Failed to reset sockets");
                last_err = Some(e);
            }
        }
        last_err.map_or(Ok(()), Err)
    }

    async fn add_idle_timer(&self, iface: &str, timeout_secs: u64, label: &str) -> TransportResult<()> {
        self.run(build_idle_timer_cmd(&self.config.iptables_cmd, "-A", iface, timeout_secs, label))
            .await
    }

    async fn remove_idle_timer(&self, iface: &str, timeout_secs: u64, label: &str) -> TransportResult<()> {
        self.run(build_idle_timer_cmd(&self.config.iptables_cmd, "-D", iface, timeout_secs, label))
            .await
    }
}

/// One call observed by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    AddRoute(String, RouteInfo),
    RemoveRoute(String, RouteInfo),
    AddSecondaryRoute(String, RouteInfo),
    RemoveSecondaryRoute(String, RouteInfo),
    SetDnsServers(String, Vec<IpAddr>),
    SetDefaultDnsInterface(String),
    SetPidDns(String, u32),
    ClearPidDns(u32),
    FlushDnsCache(String),
    ResetConnections(String, ResetMask),
    AddIdleTimer(String, u64),
    RemoveIdleTimer(String),
}

impl TransportCall {
    /// Operation name, as used for failure injection.
    pub fn op(&self) -> &'static str {
        match self {
            TransportCall::AddRoute(..) => "add_route",
            TransportCall::RemoveRoute(..) => "remove_route",
            TransportCall::AddSecondaryRoute(..) => "add_secondary_route",
            TransportCall::RemoveSecondaryRoute(..) => "remove_secondary_route",
            TransportCall::SetDnsServers(..) => "set_dns_servers",
            TransportCall::SetDefaultDnsInterface(..) => "set_default_dns_interface",
            TransportCall::SetPidDns(..) => "set_pid_dns",
            TransportCall::ClearPidDns(..) => "clear_pid_dns",
            TransportCall::FlushDnsCache(..) => "flush_dns_cache",
            TransportCall::ResetConnections(..) => "reset_connections",
            TransportCall::AddIdleTimer(..) => "add_idle_timer",
            TransportCall::RemoveIdleTimer(..) => "remove_idle_timer",
        }
    }
}

/// Transport that records calls instead of executing them.
///
/// Used by tests and by `--dry-run`. Operations named in the failure set
/// are recorded and then fail.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call of operation `op` fail.
    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().insert(op);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    fn record(&self, call: TransportCall) -> TransportResult<()> {
        let op = call.op();
        tracing::debug!(?call, "transport (recorded)");
        self.calls.lock().push(call);
        if self.failing.lock().contains(op) {
            return Err(TransportError::rejected(op, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl NetdTransport for RecordingTransport {
    async fn add_route(&self, iface: &str, route: &RouteInfo) -> TransportResult<()> {
        self.record(TransportCall::AddRoute(iface.to_string(), route.clone()))
    }

    async fn remove_route(&self, iface: &str, route: &RouteInfo) -> TransportResult<()> {
        self.record(TransportCall::RemoveRoute(iface.to_string(), route.clone()))
    }

    async fn add_secondary_route(&self, iface: &str, route: &RouteInfo) -> TransportResult<()> {
        self.record(TransportCall::AddSecondaryRoute(iface.to_string(), route.clone()))
    }

    async fn remove_secondary_route(&self, iface: &str, route: &RouteInfo) -> TransportResult<()> {
        self.record(TransportCall::RemoveSecondaryRoute(iface.to_string(), route.clone()))
    }

    async fn set_dns_servers_for_interface(&self, iface: &str, servers: &[IpAddr]) -> TransportResult<()> {
        self.record(TransportCall::SetDnsServers(iface.to_string(), servers.to_vec()))
    }

    async fn set_default_interface_for_dns(&self, iface: &str) -> TransportResult<()> {
        self.record(TransportCall::SetDefaultDnsInterface(iface.to_string()))
    }

    async fn set_dns_interface_for_pid(&self, iface: &str, pid: u32) -> TransportResult<()> {
        self.record(TransportCall::SetPidDns(iface.to_string(), pid))
    }

    async fn clear_dns_interface_for_pid(&self, pid: u32) -> TransportResult<()> {
        self.record(TransportCall::ClearPidDns(pid))
    }

    async fn flush_interface_dns_cache(&self, iface: &str) -> TransportResult<()> {
        self.record(TransportCall::FlushDnsCache(iface.to_string()))
    }

    async fn reset_connections(
        &self,
        iface: &str,
        mask: ResetMask,
        _addresses: &[LinkAddress],
    ) -> TransportResult<()> {
        self.record(TransportCall::ResetConnections(iface.to_string(), mask))
    }

    async fn add_idle_timer(&self, iface: &str, timeout_secs: u64, _label: &str) -> TransportResult<()> {
        self.record(TransportCall::AddIdleTimer(iface.to_string(), timeout_secs))
    }

    async fn remove_idle_timer(&self, iface: &str, _timeout_secs: u64, _label: &str) -> TransportResult<()> {
        self.record(TransportCall::RemoveIdleTimer(iface.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn route(dest: &str, gw: Option<&str>) -> RouteInfo {
        RouteInfo::new(dest.parse().unwrap(), gw.map(|g| g.parse().unwrap()))
    }

    #[test]
    fn test_build_route_cmd() {
        let cmd = build_route_cmd("/sbin/ip", "add", "wlan0", &route("0.0.0.0/0", Some("192.168.1.1")), None);
        assert_eq!(
            cmd,
            "/sbin/ip -4 route add \"0.0.0.0/0\" via \"192.168.1.1\" dev \"wlan0\""
        );

        let cmd = build_route_cmd("/sbin/ip", "del", "rmnet0", &route("2001:db8::/64", None), Some(1000));
        assert_eq!(
            cmd,
            "/sbin/ip -6 route del \"2001:db8::/64\" dev \"rmnet0\" table 1000"
        );
    }

    #[test]
    fn test_build_dns_cmd() {
        let servers: Vec<IpAddr> = vec!["8.8.8.8".parse().unwrap(), "1.1.1.1".parse().unwrap()];
        assert_eq!(
            build_dns_cmd("/usr/bin/resolvectl", "eth0", &servers),
            "/usr/bin/resolvectl dns \"eth0\" \"8.8.8.8\" \"1.1.1.1\""
        );
    }

    #[test]
    fn test_build_idle_timer_cmd() {
        assert_eq!(
            build_idle_timer_cmd("/sbin/iptables", "-A", "wwan0", 5, "mobile"),
            "/sbin/iptables -t raw -A PREROUTING -i \"wwan0\" -j IDLETIMER --timeout 5 --label \"mobile\""
        );
    }

    #[test]
    fn test_reset_mask() {
        let mut mask = ResetMask::NONE;
        assert!(mask.is_empty());
        mask.include(&"10.0.0.1".parse().unwrap());
        assert_eq!(mask.to_string(), "ipv4");
        assert!(!mask.covers(&"::1".parse().unwrap()));
        assert_eq!(ResetMask::ALL.to_string(), "all");
    }

    #[tokio::test]
    async fn test_recording_transport_injects_failures() {
        let transport = RecordingTransport::new();
        transport.fail_on("remove_route");

        let r = route("10.0.0.0/8", None);
        assert!(transport.add_route("eth0", &r).await.is_ok());
        assert!(transport.remove_route("eth0", &r).await.is_err());
        assert_eq!(
            transport.take_calls(),
            vec![
                TransportCall::AddRoute("eth0".into(), r.clone()),
                TransportCall::RemoveRoute("eth0".into(), r),
            ]
        );
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pid_dns_files() {
        let dir = tempfile::tempdir().unwrap();
        let transport = IpCommandTransport::new(TransportSection {
            pid_dns_dir: dir.path().join("pid-dns"),
            ..TransportSection::default()
        });

        transport.set_dns_interface_for_pid("rmnet1", 100).await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("pid-dns/100")).unwrap();
        assert_eq!(content, "rmnet1\n");

        transport.clear_dns_interface_for_pid(100).await.unwrap();
        assert!(!dir.path().join("pid-dns/100").exists());
        // Clearing again is not an error
        transport.clear_dns_interface_for_pid(100).await.unwrap();
    }
}
