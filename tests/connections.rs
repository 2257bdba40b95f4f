//! Per-connection behaviour: transports, states, timeouts and isolation.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sockd::net::stream::BoxedStream;
use sockd::net::tls::Plaintext;
use sockd::{echo, Addr, Conn, ConnState, RawStream, Server, ServerConfig, Upgrader};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

mod common;

use common::{ErrorLog, StateLog};

const WAIT: Duration = Duration::from_secs(5);

fn tcp_config() -> ServerConfig {
    ServerConfig::tcp("127.0.0.1:0")
}

async fn echo_roundtrip(client: &mut TcpStream, payload: &[u8]) {
    client.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, payload);
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_echo() {
    use std::os::unix::fs::PermissionsExt;
    use tokio::net::UnixStream;

    let (_dir, path) = common::socket_path("echo.sock");
    let config = ServerConfig::unix(path.to_string_lossy()).with_file_mode(0o660);
    let server = Server::new(config, echo).unwrap();
    let running = common::start(&server).await;

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o660);
    assert_eq!(server.local_addr(), Some(Addr::Unix(Some(path.clone()))));

    let mut client = UnixStream::connect(&path).await.unwrap();
    client.write_all(b"ping\n").await.unwrap();
    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping\n");
    assert_eq!(server.open_connections(), 1);

    drop(client);
    common::wait_until(WAIT, || server.open_connections() == 0).await;

    server.close().await;
    running.await.unwrap().unwrap();
    assert!(!common::exists(&path));
}

#[cfg(unix)]
#[tokio::test]
async fn stale_socket_file_is_replaced() {
    let (_dir, path) = common::socket_path("stale.sock");
    // A bound-then-dropped std listener leaves a dead socket file behind.
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
    assert!(common::exists(&path));

    let server = Server::new(ServerConfig::unix(path.to_string_lossy()), echo).unwrap();
    let running = common::start(&server).await;

    let mut client = tokio::net::UnixStream::connect(&path).await.unwrap();
    client.write_all(b"ok").await.unwrap();
    let mut buf = [0u8; 2];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ok");

    server.close().await;
    running.await.unwrap().unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn live_socket_is_not_stolen() {
    let (_dir, path) = common::socket_path("live.sock");
    let first = Server::new(ServerConfig::unix(path.to_string_lossy()), echo).unwrap();
    let running = common::start(&first).await;

    let second = Server::new(ServerConfig::unix(path.to_string_lossy()), echo).unwrap();
    let err = second.listen(std::future::pending()).await.unwrap_err();
    match err {
        sockd::ServerError::SocketFile { source, .. } => {
            assert_eq!(source.kind(), io::ErrorKind::AddrInUse)
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(common::exists(&path));

    first.close().await;
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn idle_timeout_fails_pending_read() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = tcp_config().with_idle_timeout(Duration::from_millis(200));
    let server = Server::new(config, move |mut conn: Conn| {
        let tx = tx.clone();
        async move {
            let started = Instant::now();
            let mut buf = [0u8; 16];
            let result = conn.read(&mut buf).await;
            let _ = tx.send((started.elapsed(), result.as_ref().err().map(io::Error::kind)));
            result.map(|_| ())
        }
    })
    .unwrap();
    let errors = ErrorLog::install(&server);
    let states = StateLog::install(&server);
    let running = common::start(&server).await;

    let mut client = TcpStream::connect(common::tcp_addr(&server)).await.unwrap();
    let remote = Addr::Tcp(client.local_addr().unwrap());

    let (elapsed, kind) = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(kind, Some(io::ErrorKind::TimedOut));
    assert!(elapsed >= Duration::from_millis(150), "fired early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(1), "fired late: {:?}", elapsed);

    // The server side closes the connection afterwards.
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(WAIT, client.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    common::wait_until(WAIT, || states.for_remote(&remote).last() == Some(&ConnState::Close)).await;
    assert_eq!(errors.kinds(), vec!["idle_timeout"]);
    assert_eq!(server.open_connections(), 0);

    server.close().await;
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn activity_keeps_connection_alive() {
    let config = tcp_config().with_idle_timeout(Duration::from_millis(200));
    let server = Server::new(config, echo).unwrap();
    let errors = ErrorLog::install(&server);
    let running = common::start(&server).await;

    let mut client = TcpStream::connect(common::tcp_addr(&server)).await.unwrap();
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        echo_roundtrip(&mut client, b"tick").await;
    }
    assert_eq!(server.open_connections(), 1);
    assert!(errors.kinds().is_empty());

    server.close().await;
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn many_short_clients_close_cleanly() {
    let server = Server::new(tcp_config(), |mut conn: Conn| async move {
        let mut sink = Vec::new();
        conn.read_to_end(&mut sink).await?;
        Ok::<_, io::Error>(())
    })
    .unwrap();
    let errors = ErrorLog::install(&server);
    let states = StateLog::install(&server);
    let running = common::start(&server).await;
    let addr = common::tcp_addr(&server);

    let clients: Vec<_> = (0..50)
        .map(|_| {
            tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                client.write_all(b"x").await.unwrap();
            })
        })
        .collect();
    for client in clients {
        client.await.unwrap();
    }

    common::wait_until(WAIT, || states.count(ConnState::Close) == 50).await;
    assert_eq!(states.count(ConnState::New), 50);
    assert_eq!(server.open_connections(), 0);
    assert!(errors.kinds().is_empty(), "unexpected errors: {:?}", errors.kinds());

    server.shutdown().await.unwrap();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn states_arrive_in_order() {
    let server = Server::new(tcp_config(), echo).unwrap();
    let states = StateLog::install(&server);
    let running = common::start(&server).await;

    let mut client = TcpStream::connect(common::tcp_addr(&server)).await.unwrap();
    let remote = Addr::Tcp(client.local_addr().unwrap());
    echo_roundtrip(&mut client, b"hi").await;
    drop(client);

    common::wait_until(WAIT, || states.for_remote(&remote).last() == Some(&ConnState::Close)).await;
    assert_eq!(
        states.for_remote(&remote),
        vec![
            ConnState::New,
            ConnState::Read,
            ConnState::Handler,
            ConnState::Write,
            ConnState::CloseWrite,
            ConnState::Close,
        ]
    );

    server.shutdown().await.unwrap();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn handler_panic_is_isolated() {
    let server = Server::new(tcp_config(), |mut conn: Conn| async move {
        let mut first = [0u8; 1];
        conn.read_exact(&mut first).await?;
        if first[0] == b'!' {
            panic!("handler refused input");
        }
        conn.write_all(&first).await?;
        echo(conn).await
    })
    .unwrap();
    let errors = ErrorLog::install(&server);
    let states = StateLog::install(&server);
    let running = common::start(&server).await;
    let addr = common::tcp_addr(&server);

    let mut bad = TcpStream::connect(addr).await.unwrap();
    bad.write_all(b"!").await.unwrap();
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(WAIT, bad.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    let mut good = TcpStream::connect(addr).await.unwrap();
    echo_roundtrip(&mut good, b"abc").await;

    common::wait_until(WAIT, || states.count(ConnState::Close) == 1).await;
    assert_eq!(errors.kinds(), vec!["panic"]);
    assert_eq!(server.open_connections(), 1);

    server.close().await;
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn failed_upgrade_still_closes() {
    let server = Server::new(tcp_config(), echo).unwrap();
    let upgrader: Arc<dyn Upgrader> = Arc::new(|_stream: RawStream| async {
        Err::<BoxedStream, _>(io::Error::new(io::ErrorKind::InvalidData, "bad handshake"))
    });
    server.set_tls(Some(upgrader)).unwrap();
    let errors = ErrorLog::install(&server);
    let states = StateLog::install(&server);
    let running = common::start(&server).await;

    let client = TcpStream::connect(common::tcp_addr(&server)).await.unwrap();
    let remote = Addr::Tcp(client.local_addr().unwrap());

    common::wait_until(WAIT, || states.for_remote(&remote).last() == Some(&ConnState::Close)).await;
    assert_eq!(states.for_remote(&remote), vec![ConnState::New, ConnState::Close]);
    assert_eq!(errors.kinds(), vec!["upgrade"]);
    assert_eq!(server.open_connections(), 0);

    server.close().await;
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn stalled_upgrade_hits_idle_timeout() {
    let config = tcp_config().with_idle_timeout(Duration::from_millis(200));
    let server = Server::new(config, echo).unwrap();
    // Waits for a handshake byte the client never sends.
    let upgrader: Arc<dyn Upgrader> = Arc::new(|mut stream: RawStream| async move {
        let mut hello = [0u8; 1];
        stream.read_exact(&mut hello).await?;
        Ok::<BoxedStream, io::Error>(Box::new(stream))
    });
    server.set_tls(Some(upgrader)).unwrap();
    let errors = ErrorLog::install(&server);
    let states = StateLog::install(&server);
    let running = common::start(&server).await;

    let started = Instant::now();
    let client = TcpStream::connect(common::tcp_addr(&server)).await.unwrap();
    let remote = Addr::Tcp(client.local_addr().unwrap());

    common::wait_until(WAIT, || states.for_remote(&remote).last() == Some(&ConnState::Close)).await;
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(states.for_remote(&remote), vec![ConnState::New, ConnState::Close]);
    assert_eq!(errors.kinds(), vec!["upgrade"]);
    assert_eq!(server.open_connections(), 0);

    drop(client);
    server.close().await;
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn plaintext_upgrader_is_transparent() {
    let server = Server::new(tcp_config(), echo).unwrap();
    server.set_tls(Some(Arc::new(Plaintext))).unwrap();
    let running = common::start(&server).await;

    let mut client = TcpStream::connect(common::tcp_addr(&server)).await.unwrap();
    echo_roundtrip(&mut client, b"clear").await;

    server.close().await;
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn tuning_hook_sees_every_connection() {
    let tuned = Arc::new(AtomicUsize::new(0));
    let server = Server::new(tcp_config(), echo).unwrap();
    {
        let tuned = tuned.clone();
        server.set_tuning_hook(Some(Box::new(move |stream: &RawStream| {
            if let RawStream::Tcp(tcp) = stream {
                let _ = tcp.set_nodelay(true);
            }
            tuned.fetch_add(1, Ordering::SeqCst);
        })));
    }
    let running = common::start(&server).await;
    let addr = common::tcp_addr(&server);

    for _ in 0..3 {
        let mut client = TcpStream::connect(addr).await.unwrap();
        echo_roundtrip(&mut client, b"n").await;
    }
    assert_eq!(tuned.load(Ordering::SeqCst), 3);

    server.close().await;
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn callback_panic_does_not_abort_connection() {
    let server = Server::new(tcp_config(), echo).unwrap();
    server.register_info(|_, _, state| {
        if state == ConnState::Handler {
            panic!("observer failed");
        }
    });
    let running = common::start(&server).await;

    let mut client = TcpStream::connect(common::tcp_addr(&server)).await.unwrap();
    echo_roundtrip(&mut client, b"still here").await;

    server.close().await;
    running.await.unwrap().unwrap();
}
