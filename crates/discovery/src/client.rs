use std::net::IpAddr;

use mdns_sd::{ServiceDaemon, ServiceEvent};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use looptap_protocol::{Endpoint, EndpointKind};

use crate::local::{get_local_ips, is_same_host};
use crate::{CONNECT_SERVICE, DiscoveryError, PAIRING_SERVICE};

/// The latest known endpoint of each kind.
///
/// Endpoints survive service-lost events on purpose: wireless-debugging
/// advertisements are intentionally short-lived, and a transiently lost
/// record should not block an action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryState {
    pub pairing: Option<Endpoint>,
    pub connect: Option<Endpoint>,
}

/// Browses both wireless-debugging service types and publishes resolved
/// endpoints through a watch channel.
pub struct DiscoveryClient {
    state_tx: watch::Sender<DiscoveryState>,
}

impl DiscoveryClient {
    /// Creates the client and the receiver observers subscribe to.
    pub fn new() -> (Self, watch::Receiver<DiscoveryState>) {
        let (state_tx, state_rx) = watch::channel(DiscoveryState::default());
        (Self { state_tx }, state_rx)
    }

    /// Runs continuous discovery until cancellation.
    ///
    /// A single `ServiceDaemon` browses both service types for the whole
    /// session. The blocking mDNS receivers are drained on dedicated
    /// blocking tasks that forward into one event channel, so no event is
    /// lost between polls; shutting the daemon down disconnects the
    /// receivers and ends the forwarders.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), DiscoveryError> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| DiscoveryError::Mdns(format!("failed to create mDNS daemon: {e}")))?;

        let pairing_rx = daemon
            .browse(PAIRING_SERVICE)
            .map_err(|e| DiscoveryError::Mdns(format!("failed to browse pairing service: {e}")))?;
        let connect_rx = daemon
            .browse(CONNECT_SERVICE)
            .map_err(|e| DiscoveryError::Mdns(format!("failed to browse connect service: {e}")))?;

        let (events_tx, mut events_rx) = mpsc::channel::<(EndpointKind, ServiceEvent)>(16);
        for (kind, rx) in [
            (EndpointKind::Pairing, pairing_rx),
            (EndpointKind::Connect, connect_rx),
        ] {
            let tx = events_tx.clone();
            tokio::task::spawn_blocking(move || {
                while let Ok(event) = rx.recv() {
                    if tx.blocking_send((kind, event)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(events_tx);

        info!("discovery running");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = daemon.shutdown();
                    info!("discovery stopped");
                    return Ok(());
                }
                event = events_rx.recv() => {
                    match event {
                        Some((kind, event)) => self.process_event(kind, event),
                        None => {
                            // Both receivers disconnected; the daemon died.
                            return Err(DiscoveryError::Mdns("mDNS daemon channel closed".into()));
                        }
                    }
                }
            }
        }
    }

    fn process_event(&self, kind: EndpointKind, event: ServiceEvent) {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let local_ips = get_local_ips();
                let Some(host) =
                    select_address(info.get_addresses().iter().copied(), &local_ips)
                else {
                    warn!(
                        service = info.get_fullname(),
                        "resolved record has no same-host address, dropping"
                    );
                    return;
                };

                let endpoint = Endpoint {
                    kind,
                    host,
                    port: info.get_port(),
                    service_name: info.get_fullname().to_string(),
                };
                info!(%endpoint, "endpoint resolved");
                self.publish(endpoint);
            }
            ServiceEvent::ServiceRemoved(_, fullname) => {
                // Keep the cached endpoint; the advertisement is expected
                // to flicker.
                debug!(service = %fullname, kind = %kind, "service lost, keeping cached endpoint");
            }
            _ => {}
        }
    }

    /// Replaces the cached endpoint of the matching kind.
    fn publish(&self, endpoint: Endpoint) {
        self.state_tx.send_if_modified(|state| {
            let slot = match endpoint.kind {
                EndpointKind::Pairing => &mut state.pairing,
                EndpointKind::Connect => &mut state.connect,
            };
            if slot.as_ref() == Some(&endpoint) {
                false
            } else {
                *slot = Some(endpoint);
                true
            }
        });
    }
}

/// Picks the address to dial from a resolved record, applying the same-host
/// filter. Loopback wins when present: that is the address the daemon
/// actually serves this node on.
fn select_address(
    addresses: impl Iterator<Item = IpAddr>,
    local_ips: &[IpAddr],
) -> Option<IpAddr> {
    let mut fallback = None;
    for ip in addresses {
        if !is_same_host(&ip, local_ips) {
            continue;
        }
        if ip.is_loopback() {
            return Some(ip);
        }
        fallback.get_or_insert(ip);
    }
    fallback
}
