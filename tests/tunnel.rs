//! End-to-end tunnel tests against a mock SOCKS5 upstream

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
    time,
};

use s5tunnel::{
    config::{Config, ServerAddr},
    net::connect_first_available,
    relay::tcprelay::TunnelSession,
    run_tcp_tunnel, Address,
};

/// Mock SOCKS5 upstream: verifies the exact greeting and CONNECT bytes, sends
/// back the canned reply, then echoes every relayed byte.
async fn spawn_mock_proxy(expect_request: Vec<u8>, reply: Vec<u8>) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut greeting = [0u8; 3];
        stream.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [0x05, 0x01, 0x00]);
        stream.write_all(&[0x05, 0x00]).await.unwrap();

        let mut request = vec![0u8; expect_request.len()];
        stream.read_exact(&mut request).await.unwrap();
        assert_eq!(request, expect_request);
        stream.write_all(&reply).await.unwrap();

        let mut buf = vec![0u8; 8192];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await.unwrap();
        }
    });

    (addr, handle)
}

async fn start_tunnel(local_port: u16, proxy_addr: SocketAddr, forward: Address) {
    let config = Config::new(local_port, ServerAddr::SocketAddr(proxy_addr), forward);
    tokio::spawn(run_tcp_tunnel(Arc::new(config)));
    time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn tunnel_ipv4_target() {
    let _ = env_logger::try_init();

    let (proxy_addr, proxy) = spawn_mock_proxy(
        vec![0x05, 0x01, 0x00, 0x01, 0x7f, 0x00, 0x00, 0x01, 0x00, 0x50],
        vec![0x05, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    )
    .await;

    start_tunnel(9410, proxy_addr, "127.0.0.1:80".parse().unwrap()).await;

    let mut client = TcpStream::connect("127.0.0.1:9410").await.unwrap();
    client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();

    let mut echoed = [0u8; 18];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"GET / HTTP/1.0\r\n\r\n");

    client.shutdown().await.unwrap();
    drop(client);

    proxy.await.unwrap();
}

#[tokio::test]
async fn tunnel_domain_target() {
    let _ = env_logger::try_init();

    // reply carries a domain bound address, it must be fully drained before
    // relaying starts
    let (proxy_addr, proxy) = spawn_mock_proxy(
        vec![
            0x05, 0x01, 0x00, 0x03, 0x0b, 0x65, 0x78, 0x61, 0x6d, 0x70, 0x6c, 0x65, 0x2e, 0x63, 0x6f, 0x6d, 0x01,
            0xbb,
        ],
        vec![
            0x05, 0x00, 0x00, 0x03, 0x0b, 0x65, 0x78, 0x61, 0x6d, 0x70, 0x6c, 0x65, 0x2e, 0x63, 0x6f, 0x6d, 0x01,
            0xbb,
        ],
    )
    .await;

    start_tunnel(9420, proxy_addr, Address::DomainNameAddress("example.com".to_owned(), 443)).await;

    let mut client = TcpStream::connect("127.0.0.1:9420").await.unwrap();
    client.write_all(b"hello").await.unwrap();

    let mut echoed = [0u8; 5];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello");

    client.shutdown().await.unwrap();
    drop(client);

    proxy.await.unwrap();
}

#[tokio::test]
async fn tunnel_ipv6_target() {
    let _ = env_logger::try_init();

    let (proxy_addr, proxy) = spawn_mock_proxy(
        vec![
            0x05, 0x01, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x01, 0x1f, 0x90,
        ],
        vec![0x05, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    )
    .await;

    start_tunnel(9430, proxy_addr, "[::1]:8080".parse().unwrap()).await;

    let mut client = TcpStream::connect("127.0.0.1:9430").await.unwrap();
    client.write_all(b"ping").await.unwrap();

    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ping");

    client.shutdown().await.unwrap();
    drop(client);

    proxy.await.unwrap();
}

#[tokio::test]
async fn tunnel_rejects_unexpected_auth_method() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    let proxy = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut greeting = [0u8; 3];
        stream.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [0x05, 0x01, 0x00]);

        // NO ACCEPTABLE METHODS; no CONNECT may follow
        stream.write_all(&[0x05, 0xff]).await.unwrap();

        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "tunnel must not send a CONNECT request");
    });

    start_tunnel(9440, proxy_addr, "127.0.0.1:80".parse().unwrap()).await;

    let mut client = TcpStream::connect("127.0.0.1:9440").await.unwrap();

    // the session dies in the method selection phase, the client side closes
    // without any payload
    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);

    proxy.await.unwrap();
}

#[tokio::test]
async fn tunnel_teardown_on_client_eof() {
    let _ = env_logger::try_init();

    let (proxy_addr, proxy) = spawn_mock_proxy(
        vec![0x05, 0x01, 0x00, 0x01, 0x7f, 0x00, 0x00, 0x01, 0x00, 0x50],
        vec![0x05, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    )
    .await;

    start_tunnel(9450, proxy_addr, "127.0.0.1:80".parse().unwrap()).await;

    let mut client = TcpStream::connect("127.0.0.1:9450").await.unwrap();
    client.write_all(b"ping").await.unwrap();

    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.unwrap();

    // half-close from the client ends the whole session: the proxy side
    // observes EOF (the mock exits) and the client read drains to EOF
    client.shutdown().await.unwrap();

    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);

    proxy.await.unwrap();
}

#[tokio::test]
async fn connect_fallback_skips_refusing_endpoints() {
    let _ = env_logger::try_init();

    // grab a port and free it again, connecting it will be refused
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let live_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live = live_listener.local_addr().unwrap();

    let stream = connect_first_available(vec![dead, live]).await.unwrap();
    assert_eq!(stream.peer_addr().unwrap(), live);
}

#[tokio::test]
async fn connect_fallback_exhaustion() {
    let _ = env_logger::try_init();

    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let err = connect_first_available(vec![dead]).await.unwrap_err();
    assert_eq!(err.to_string(), "no resolved address is available");

    let err = connect_first_available(Vec::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "no resolved address is available");
}

#[tokio::test]
async fn session_stop_is_idempotent() {
    let _ = env_logger::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accepted = tokio::spawn(async move { listener.accept().await.unwrap() });
    let _client = TcpStream::connect(addr).await.unwrap();
    let (stream, peer_addr) = accepted.await.unwrap();

    let config = Config::new(
        9999,
        ServerAddr::SocketAddr(addr),
        "127.0.0.1:80".parse().unwrap(),
    );

    let mut session = TunnelSession::new(stream, peer_addr, Arc::new(config));
    session.stop().await;
    session.stop().await;
    session.stop().await;
}
