//! HTTP proxy selection.

use super::{Orchestrator, Shared};
use crate::broadcast::Broadcast;
use conn_types::ProxyInfo;

fn normalize(proxy: Option<ProxyInfo>) -> Option<ProxyInfo> {
    proxy.filter(|p| !p.host.is_empty())
}

impl Orchestrator {
    /// Adopts the default network's proxy. A global proxy masks the change.
    pub(super) fn apply_default_proxy(&mut self, proxy: Option<ProxyInfo>) {
        let proxy = normalize(proxy);
        let announce = {
            let mut state = self.shared.proxy.write();
            if state.default_proxy == proxy {
                return;
            }
            state.default_proxy = proxy.clone();
            state.global_proxy.is_none()
        };
        tracing::info!(proxy = ?proxy, "Default proxy changed");
        if announce {
            self.shared.broadcasts.send(Broadcast::ProxyChanged { proxy });
        }
    }
}

impl Orchestrator {
    /// Sets or clears the administrator proxy.
    pub(super) fn handle_set_global_proxy(&mut self, proxy: Option<ProxyInfo>) {
        let proxy = normalize(proxy);
        let effective = {
            let mut state = self.shared.proxy.write();
            if state.global_proxy == proxy {
                return;
            }
            let before = state.effective();
            state.global_proxy = proxy;
            let after = state.effective();
            if before == after {
                return;
            }
            after
        };
        tracing::info!(proxy = ?effective, "Effective proxy changed");
        self.shared.broadcasts.send(Broadcast::ProxyChanged { proxy: effective });
    }
}

impl Shared {
    pub fn global_proxy(&self) -> Option<ProxyInfo> {
        self.proxy.read().global_proxy.clone()
    }

    /// The proxy clients should use right now.
    pub fn proxy(&self) -> Option<ProxyInfo> {
        self.proxy.read().effective()
    }
}
