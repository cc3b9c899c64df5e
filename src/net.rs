//! Inbound listeners and upstream connectivity

use std::{io, net::SocketAddr};

use log::{debug, trace};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{lookup_host, TcpListener, TcpStream};

use crate::config::ServerAddr;

/// Creates a TCP listener bound to `addr` with `SO_REUSEADDR`
///
/// IPv6 listeners additionally set `IPV6_V6ONLY`, so a v4 listener on the
/// same port does not collide with them.
pub fn create_inbound_tcp_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    TcpListener::from_std(socket.into())
}

/// Connects the upstream SOCKS5 proxy
///
/// Domain names are re-resolved for every call; resolver failures propagate
/// as-is.
pub async fn connect_server(addr: &ServerAddr) -> io::Result<TcpStream> {
    match *addr {
        ServerAddr::SocketAddr(saddr) => {
            trace!("connecting {}", saddr);
            TcpStream::connect(saddr).await
        }
        ServerAddr::DomainName(ref dname, port) => {
            let addrs = lookup_host((dname.as_str(), port)).await?;
            connect_first_available(addrs).await
        }
    }
}

/// Attempts a TCP connect against each candidate front-to-back
///
/// A failed attempt closes its half-opened socket before the next candidate
/// is tried. The first established connection wins.
pub async fn connect_first_available<I>(addrs: I) -> io::Result<TcpStream>
where
    I: IntoIterator<Item = SocketAddr>,
{
    for addr in addrs {
        trace!("connecting {}", addr);
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!("failed to connect {}, error: {}", addr, err);
            }
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        "no resolved address is available",
    ))
}
