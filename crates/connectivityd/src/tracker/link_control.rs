//! Bringing links up and down.

use conn_common::shell::{self, shellquote};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;

/// Link operations a tracker may request. Calls must not block.
pub trait LinkControl: Send + Sync {
    fn bring_up(&self, iface: &str);
    fn bring_down(&self, iface: &str);
    fn is_present(&self, iface: &str) -> bool;
}

/// Builds `ip link set dev <iface> up|down`.
pub fn build_link_cmd(ip_cmd: &str, iface: &str, up: bool) -> String {
    format!(
        "{} link set dev {} {}",
        ip_cmd,
        shellquote(iface),
        if up { "up" } else { "down" }
    )
}

/// Link control through the `ip` command and sysfs.
pub struct ShellLinkControl {
    ip_cmd: String,
    sysfs_net: PathBuf,
}

impl ShellLinkControl {
    pub fn new(ip_cmd: impl Into<String>) -> Self {
        Self {
            ip_cmd: ip_cmd.into(),
            sysfs_net: PathBuf::from("/sys/class/net"),
        }
    }

    pub fn with_sysfs_root(mut self, sysfs_net: impl Into<PathBuf>) -> Self {
        self.sysfs_net = sysfs_net.into();
        self
    }

    fn spawn(&self, iface: &str, up: bool) {
        let cmd = build_link_cmd(&self.ip_cmd, iface, up);
        let iface = iface.to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = shell::exec_or_throw(&cmd).await {
                        tracing::error!(iface = %iface, error = %e, "Link command failed");
                    }
                });
            }
            Err(_) => tracing::error!(iface = %iface, "No runtime to run link command"),
        }
    }
}

impl LinkControl for ShellLinkControl {
    fn bring_up(&self, iface: &str) {
        tracing::info!(iface, "Bringing link up");
        self.spawn(iface, true);
    }

    fn bring_down(&self, iface: &str) {
        tracing::info!(iface, "Bringing link down");
        self.spawn(iface, false);
    }

    fn is_present(&self, iface: &str) -> bool {
        self.sysfs_net.join(iface).exists()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOp {
    Up(String),
    Down(String),
}

/// Link control that records requests. Every interface is present unless
/// removed with [`RecordingLinkControl::set_present`].
#[derive(Debug, Default)]
pub struct RecordingLinkControl {
    ops: Mutex<Vec<LinkOp>>,
    absent: Mutex<HashSet<String>>,
}

impl RecordingLinkControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_present(&self, iface: &str, present: bool) {
        let mut absent = self.absent.lock();
        if present {
            absent.remove(iface);
        } else {
            absent.insert(iface.to_string());
        }
    }

    pub fn ops(&self) -> Vec<LinkOp> {
        self.ops.lock().clone()
    }

    pub fn take_ops(&self) -> Vec<LinkOp> {
        std::mem::take(&mut *self.ops.lock())
    }
}

impl LinkControl for RecordingLinkControl {
    fn bring_up(&self, iface: &str) {
        self.ops.lock().push(LinkOp::Up(iface.to_string()));
    }

    fn bring_down(&self, iface: &str) {
        self.ops.lock().push(LinkOp::Down(iface.to_string()));
    }

    fn is_present(&self, iface: &str) -> bool {
        !self.absent.lock().contains(iface)
    }
}
