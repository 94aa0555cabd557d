mod common;

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use tiller_router_lib::types::Route;

use common::TestRouter;

const WAIT: Duration = Duration::from_secs(5);

/// Raw TCP backend: answers any upgrade request with 101, greets with
/// `hello`, then echoes every byte it reads.
async fn spawn_echo_backend() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let task = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (head, _leftover) = read_head(&mut stream).await;
                assert!(
                    head.to_ascii_lowercase().contains("upgrade"),
                    "backend expected an upgrade handshake, got: {head}"
                );
                stream
                    .write_all(
                        b"HTTP/1.1 101 Switching Protocols\r\n\
                          Connection: Upgrade\r\n\
                          Upgrade: echo\r\n\r\n",
                    )
                    .await
                    .unwrap();
                stream.write_all(b"hello").await.unwrap();

                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    (addr, task)
}

/// Reads an HTTP message head; returns it with any bytes that arrived
/// past the blank line.
async fn read_head(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let leftover = buf.split_off(pos + 4);
            return (String::from_utf8_lossy(&buf).into_owned(), leftover);
        }
        let n = timeout(WAIT, stream.read(&mut chunk))
            .await
            .expect("timed out reading message head")
            .expect("peer closed while reading head");
        assert!(n > 0, "peer closed while reading head");
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn read_exact_bytes(stream: &mut TcpStream, want: &[u8], mut leftover: Vec<u8>) -> Vec<u8> {
    let mut chunk = [0u8; 1024];
    while leftover.len() < want.len() {
        let n = timeout(WAIT, stream.read(&mut chunk))
            .await
            .expect("timed out reading tunnel data")
            .expect("tunnel closed early");
        assert!(n > 0, "tunnel closed early");
        leftover.extend_from_slice(&chunk[..n]);
    }
    let rest = leftover.split_off(want.len());
    assert_eq!(leftover, want);
    rest
}

#[tokio::test]
async fn upgrade_tunnel_copies_both_directions_until_close() {
    let router = TestRouter::start().await;
    let (backend_addr, _backend) = spawn_echo_backend().await;
    router.register_backend("ws", backend_addr);
    router.add_route(Route::new("ws.test", "ws")).await;

    let mut client = TcpStream::connect(("127.0.0.1", router.http_port()))
        .await
        .unwrap();
    client
        .write_all(
            b"GET /socket HTTP/1.1\r\n\
              Host: ws.test\r\n\
              Connection: Upgrade\r\n\
              Upgrade: echo\r\n\r\n",
        )
        .await
        .unwrap();

    let (head, leftover) = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 101"), "unexpected response: {head}");
    assert!(head.to_ascii_lowercase().contains("upgrade: echo"));

    // Backend speaks first, then echoes what the client sends.
    let leftover = read_exact_bytes(&mut client, b"hello", leftover).await;
    client.write_all(b"ping over the tunnel").await.unwrap();
    let leftover = read_exact_bytes(&mut client, b"ping over the tunnel", leftover).await;
    assert!(leftover.is_empty());

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn upgrade_to_a_dead_backend_is_503() {
    let router = TestRouter::start().await;
    // Reserve a port and close it again so the dial is refused.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    router.register_backend("ws", dead_addr);
    router.add_route(Route::new("ws.test", "ws")).await;

    let mut client = TcpStream::connect(("127.0.0.1", router.http_port()))
        .await
        .unwrap();
    client
        .write_all(
            b"GET /socket HTTP/1.1\r\n\
              Host: ws.test\r\n\
              Connection: Upgrade\r\n\
              Upgrade: echo\r\n\r\n",
        )
        .await
        .unwrap();

    let (head, _) = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 503"), "unexpected response: {head}");
}
