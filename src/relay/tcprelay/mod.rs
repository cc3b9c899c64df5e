//! TCP tunnel sessions
//!
//! Every accepted client connection gets one [`TunnelSession`] which connects
//! the upstream SOCKS5 proxy, asks it to CONNECT to the configured target and
//! then relays bytes in both directions until either side goes away.

use std::{
    io::{self, ErrorKind},
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use log::{debug, error, info, trace};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    time,
};

use crate::{
    config::Config,
    net::{connect_server, create_inbound_tcp_listener},
    relay::socks5::{
        self, Command, Error as Socks5Error, HandshakeRequest, HandshakeResponse, Reply, TcpRequestHeader,
        TcpResponseHeader,
    },
};

use self::utils::relay_bidirectional;

pub mod utils;

/// One accepted client connection tunneled through the upstream SOCKS5 proxy
///
/// The session owns the accepted (outer) stream for its whole lifetime; the
/// stream to the proxy (inner) is assigned exactly once, after the
/// connect-with-fallback loop succeeds.
pub struct TunnelSession {
    outer: TcpStream,
    inner: Option<TcpStream>,
    peer_addr: SocketAddr,
    config: Arc<Config>,
}

impl TunnelSession {
    /// Creates a session for an accepted stream
    pub fn new(outer: TcpStream, peer_addr: SocketAddr, config: Arc<Config>) -> TunnelSession {
        TunnelSession {
            outer,
            inner: None,
            peer_addr,
            config,
        }
    }

    /// Drives the session to completion
    ///
    /// All failures are consumed here; a dying session never disturbs the
    /// acceptor or any other session.
    pub async fn run(mut self) {
        if let Err(err) = self.serve().await {
            if err.kind() == ErrorKind::UnexpectedEof {
                // clean half-close during the handshake
                debug!("tunnel {} closed before handshake completed", self.peer_addr);
            } else {
                error!("tunnel {} failed, error: {}", self.peer_addr, err);
            }
        }
        self.stop().await;
    }

    async fn serve(&mut self) -> io::Result<()> {
        trace!(
            "establishing tcp tunnel {} <-> {} through {}",
            self.peer_addr,
            self.config.forward,
            self.config.server
        );

        let inner = connect_server(&self.config.server).await?;
        let inner = self.inner.insert(inner);

        // phase 1: method selection, NO AUTHENTICATION is the only offer
        let hs = HandshakeRequest::new(vec![socks5::SOCKS5_AUTH_METHOD_NONE]);
        hs.write_to(inner).await?;

        let hsp = HandshakeResponse::read_from(inner).await.map_err(io::Error::from)?;
        if hsp.chosen_method != socks5::SOCKS5_AUTH_METHOD_NONE {
            return Err(Socks5Error::AuthMethodNotAcceptable(hsp.chosen_method).into());
        }

        // phase 2: CONNECT to the fixed target, then drain the whole reply
        // before any payload byte flows
        let req = TcpRequestHeader::new(Command::TcpConnect, self.config.forward.clone());
        req.write_to(inner).await?;

        let rsp = TcpResponseHeader::read_from(inner).await.map_err(io::Error::from)?;
        match rsp.reply {
            Reply::Succeeded => trace!("socks5 CONNECT {} bound at {}", self.config.forward, rsp.address),
            r => return Err(Socks5Error::Reply(r).into()),
        }

        debug!(
            "established tcp tunnel {} <-> {} through {}",
            self.peer_addr, self.config.forward, self.config.server
        );

        match relay_bidirectional(&mut self.outer, inner).await {
            Ok((o2i, i2o)) => {
                trace!(
                    "tcp tunnel {} <-> {} closed, L2R {} bytes, R2L {} bytes",
                    self.peer_addr,
                    self.config.forward,
                    o2i,
                    i2o
                );
            }
            Err(err) => {
                debug!(
                    "tcp tunnel {} <-> {} closed with error: {}",
                    self.peer_addr, self.config.forward, err
                );
            }
        }

        Ok(())
    }

    /// Shuts down both streams
    ///
    /// Idempotent. Shutting down a stream that is already closed is not a
    /// session-level failure, so individual errors are swallowed; dropping
    /// the session afterwards closes the descriptors.
    pub async fn stop(&mut self) {
        let _ = self.outer.shutdown().await;
        if let Some(ref mut inner) = self.inner {
            let _ = inner.shutdown().await;
        }
    }
}

/// Runs the tunnel acceptors until the process is stopped
///
/// IPv4 and IPv6 listeners are bound independently on the same port; the v6
/// listener is v6-only so the two never collide. Either listener failing to
/// bind is fatal at startup.
pub async fn run_tcp_tunnel(config: Arc<Config>) -> io::Result<()> {
    let v4_addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), config.local_port);
    let v4_listener = create_inbound_tcp_listener(v4_addr)?;
    info!("s5tunnel TCP listening on {}", v4_listener.local_addr()?);

    let v6_addr = SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), config.local_port);
    let v6_listener = create_inbound_tcp_listener(v6_addr)?;
    info!("s5tunnel TCP listening on {}", v6_listener.local_addr()?);

    tokio::try_join!(
        accept_loop(v4_listener, config.clone()),
        accept_loop(v6_listener, config),
    )?;

    Ok(())
}

async fn accept_loop(listener: TcpListener, config: Arc<Config>) -> io::Result<()> {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(s) => s,
            Err(err) => {
                error!("accept failed with error: {}", err);
                time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        trace!("accepted tcp client {}", peer_addr);

        let session = TunnelSession::new(stream, peer_addr, config.clone());
        tokio::spawn(session.run());
    }
}
