use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use str0m::{net::Protocol, Candidate};
use systemstat::{Platform, System};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. Level comes from `RUST_LOG`, default `info`.
pub fn init_log() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Pick an IPv4 address that can be shared with a remote ICE peer.
///
/// Iterates over all network interfaces provided by `systemstat`, skipping any
/// loopback, link-local or broadcast addresses. The first routable interface is
/// returned. When the host exposes none (containers, CI) the loopback address
/// is used so that local agents can still connect.
pub fn select_host_address() -> IpAddr {
    let system = System::new();
    match system.networks() {
        Ok(networks) => {
            for net in networks.values() {
                for n in &net.addrs {
                    if let systemstat::IpAddr::V4(v) = n.addr {
                        if !v.is_loopback() && !v.is_link_local() && !v.is_broadcast() {
                            info!("Using interface {} ({})", net.name, v);
                            return IpAddr::V4(v);
                        }
                    }
                }
            }
            warn!("Found no routable network interface, falling back to loopback");
        }
        Err(e) => warn!("Cannot list network interfaces ({}), falling back to loopback", e),
    }

    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Host candidate for a bound UDP address.
pub fn host_candidate(addr: SocketAddr) -> anyhow::Result<Candidate> {
    Ok(Candidate::host(addr, Protocol::Udp)?)
}
