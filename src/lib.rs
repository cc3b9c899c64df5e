//! s5tunnel forwards TCP connections through an upstream SOCKS5 proxy.
//!
//! Every connection accepted on the local port opens its own tunnel: the
//! upstream proxy is resolved and connected, a SOCKS5 handshake (RFC 1928,
//! NO AUTHENTICATION, CONNECT) asks it to reach one fixed target, and from
//! then on bytes are relayed verbatim in both directions until either side
//! closes.
//!
//! ```bash
//! s5tunnel -p 8000 --socks5-host 127.0.0.1 --socks5-port 1080 \
//!     --http-host example.com --http-port 80
//! ```

/// s5tunnel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use self::{
    config::{Config, ServerAddr},
    relay::{socks5::Address, tcprelay::run_tcp_tunnel},
};

pub mod config;
pub mod logging;
pub mod monitor;
pub mod net;
pub mod relay;
pub mod service;
