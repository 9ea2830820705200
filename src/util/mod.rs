use local_ip_address::list_afinet_netifas;
use std::net::{IpAddr, SocketAddr};
use str0m::Candidate;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Verbosity;

/// Installs the global subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn init_log(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    // A second call (tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .try_init();
}

/// Pick an IPv4 address that can be shared with a remote ICE peer.
///
/// Skips loopback and link-local addresses; the first routable interface is
/// returned.
pub fn select_host_address() -> Option<IpAddr> {
    let network_interfaces = match list_afinet_netifas() {
        Ok(n) => n,
        Err(e) => {
            warn!("Listing network interfaces failed: {}", e);
            return None;
        }
    };

    for (name, ip) in network_interfaces {
        debug!("iface: {} / {:?}", name, ip);
        if let IpAddr::V4(ip4) = ip {
            if !ip4.is_loopback() && !ip4.is_link_local() && !ip4.is_broadcast() {
                return Some(ip);
            }
        }
    }

    None
}

/// A host candidate for the socket the session is bound to.
pub fn host_candidate(addr: SocketAddr) -> Option<Candidate> {
    match Candidate::host(addr, str0m::net::Protocol::Udp) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("No host candidate for {}: {:?}", addr, e);
            None
        }
    }
}
