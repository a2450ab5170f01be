//! Concrete challenge providers that can be bound to a CA client.

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs},
};

mod dns;
mod http01;
mod tlsalpn01;
mod webroot;

pub use dns::{dns01_record, DnsProviderConstructor, DnsProviderRegistry, ExecProvider};
pub use http01::{HttpServerProvider, ACME_CHALLENGE_PREFIX};
pub use tlsalpn01::{challenge_certificate, TlsAlpnServerProvider, ACME_TLS_1_PROTOCOL};
pub use webroot::WebRootProvider;

/// Addresses a challenge listener tries in order. An empty host means every
/// interface: the IPv6 wildcard first, which also accepts IPv4 where the OS
/// runs dual-stack sockets (the Linux default), then the IPv4 wildcard for
/// hosts without IPv6.
fn listen_addrs(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    if host.is_empty() {
        return Ok(vec![
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        ]);
    }
    Ok((host, port).to_socket_addrs()?.collect())
}
