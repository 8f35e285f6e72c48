//! End-to-end tests for connect, failover, timeouts and the retry wrapper
//!
//! Every scenario runs against a real listener on a loopback port; the
//! fixture servers live in spawned threads.

use std::collections::HashSet;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tcp_failover::{Cause, Client, Config, Error, Policy};

/// A bound-then-dropped port: nothing listens on it afterwards.
fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn echo_server(listener: TcpListener, len: usize) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).unwrap();
        stream.write_all(&buf).unwrap();
    })
}

#[test]
fn test_connect_write_read_roundtrip() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = echo_server(listener, 4);

    let config = Config::builder()
        .server(format!("127.0.0.1:{port}"))
        .connect_timeout(2.0)
        .read_timeout(2.0)
        .write_timeout(2.0)
        .build()
        .unwrap();
    let mut client = Client::new(config);

    client.connect().unwrap();
    assert!(!client.closed());
    assert_eq!(client.write(b"ping", None).unwrap(), 4);
    assert_eq!(&client.read(4, None).unwrap()[..], b"ping");

    client.close();
    assert!(client.closed());
    server.join().unwrap();
}

#[test]
fn test_failover_to_second_server() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let live_port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let _stream = listener.accept().unwrap();
    });

    let config = Config::builder()
        .server(format!("127.0.0.1:{}", dead_port()))
        .server(format!("127.0.0.1:{live_port}"))
        .connect_timeout(2.0)
        .connect_retry_count(0)
        .build()
        .unwrap();
    let mut client = Client::new(config);

    client.connect().unwrap();
    assert_eq!(client.peer().unwrap().port(), live_port);

    // close() twice must not raise.
    client.close();
    client.close();
    server.join().unwrap();
}

#[test]
fn test_refused_connect_sweeps_with_interval() {
    let port = dead_port();
    let config = Config::builder()
        .server(format!("127.0.0.1:{port}"))
        .connect_timeout(2.0)
        .connect_retry_count(2)
        .connect_retry_interval(0.1)
        .build()
        .unwrap();
    let mut client = Client::new(config);

    let started = Instant::now();
    let err = client.connect().unwrap_err();

    // Two sleeps between the three sweeps.
    assert!(started.elapsed() >= Duration::from_millis(200));
    match err {
        Error::ConnectionFailure {
            server,
            cause: Cause::Io(e),
        } => {
            assert_eq!(e.kind(), ErrorKind::ConnectionRefused);
            assert!(server.contains(&format!("127.0.0.1:{port}")));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_non_retryable_cause_skips_sweeps() {
    let config = Config::builder()
        .server(format!("127.0.0.1:{}", dead_port()))
        .connect_timeout(2.0)
        .connect_retry_count(5)
        .connect_retry_interval(0.5)
        // Refused connections are not in this set, so no sweep retries.
        .retryable_errors(HashSet::from([ErrorKind::ConnectionReset]))
        .build()
        .unwrap();
    let mut client = Client::new(config);

    let started = Instant::now();
    assert!(client.connect().is_err());
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[test]
fn test_connect_timeout_against_saturated_backlog() {
    // A listener whose accept queue is full drops further handshakes, which
    // is the portable way to get a connect that neither succeeds nor fails.
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .unwrap();
    socket
        .bind(&"127.0.0.1:0".parse::<std::net::SocketAddr>().unwrap().into())
        .unwrap();
    socket.listen(0).unwrap();
    let port = socket
        .local_addr()
        .unwrap()
        .as_socket()
        .unwrap()
        .port();

    // Saturate the queue; these connects are never accepted.
    let addr: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let mut fillers = Vec::new();
    for _ in 0..4 {
        if let Ok(stream) = TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
            fillers.push(stream);
        }
    }

    let config = Config::builder()
        .server(format!("127.0.0.1:{port}"))
        .connect_timeout(0.5)
        .connect_retry_count(0)
        .build()
        .unwrap();
    let mut client = Client::new(config);

    let started = Instant::now();
    let err = client.connect().unwrap_err();

    assert!(matches!(err, Error::ConnectionTimeout { .. }));
    // Configured 0.5s must complete within a small bounded overshoot.
    assert!(started.elapsed() < Duration::from_millis(1500));
    drop(fillers);
}

#[test]
fn test_read_timeout_then_recovery_without_close_on_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(300));
        stream.write_all(b"late!").unwrap();
        // Hold the stream until the client has read the answer.
        thread::sleep(Duration::from_millis(300));
    });

    let config = Config::builder()
        .server(format!("127.0.0.1:{port}"))
        .connect_timeout(2.0)
        .close_on_error(false)
        .build()
        .unwrap();
    let mut client = Client::new(config);
    client.connect().unwrap();

    let started = Instant::now();
    let err = client.read(5, Some(0.1)).unwrap_err();
    assert!(matches!(err, Error::ReadTimeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(90));

    // The connection survived the timeout and still answers.
    assert!(client.alive());
    assert_eq!(&client.read(5, Some(2.0)).unwrap()[..], b"late!");

    server.join().unwrap();
}

#[test]
fn test_read_timeout_closes_with_close_on_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (_stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(300));
    });

    let config = Config::builder()
        .server(format!("127.0.0.1:{port}"))
        .connect_timeout(2.0)
        .close_on_error(true)
        .build()
        .unwrap();
    let mut client = Client::new(config);
    client.connect().unwrap();

    let err = client.read(1, Some(0.1)).unwrap_err();
    assert!(matches!(err, Error::ReadTimeout { .. }));
    assert!(client.closed());
    assert!(!client.alive());

    server.join().unwrap();
}

#[test]
fn test_retry_wrapper_reconnects_after_peer_reset() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        // First connection is dropped immediately; the second one answers.
        let (first, _) = listener.accept().unwrap();
        drop(first);

        let (mut second, _) = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        second.read_exact(&mut buf).unwrap();
        second.write_all(b"pong").unwrap();
    });

    let config = Config::builder()
        .server(format!("127.0.0.1:{port}"))
        .connect_timeout(2.0)
        .retry_count(3)
        .build()
        .unwrap();
    let mut client = Client::new(config);

    let reply = client
        .retry_on_connection_failure(|client| {
            client.write(b"ping", Some(2.0))?;
            client.read(4, Some(2.0))
        })
        .unwrap();

    assert_eq!(&reply[..], b"pong");
    server.join().unwrap();
}

#[test]
fn test_retry_wrapper_propagates_non_retryable_cause() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (_stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    let config = Config::builder()
        .server(format!("127.0.0.1:{port}"))
        .connect_timeout(2.0)
        .retry_count(5)
        .build()
        .unwrap();
    let mut client = Client::new(config);

    let executions = Arc::new(AtomicUsize::new(0));
    let counter = executions.clone();

    // A protocol-level rejection surfaced as a connection failure must not
    // be blindly retried.
    let err = client
        .retry_on_connection_failure(move |client| -> tcp_failover::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::ConnectionFailure {
                server: client.peer().unwrap().to_string(),
                cause: Cause::Io(std::io::Error::from(ErrorKind::PermissionDenied)),
            })
        })
        .unwrap_err();

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert!(matches!(err, Error::ConnectionFailure { .. }));
    server.join().unwrap();
}

#[test]
fn test_retry_wrapper_exhaustion_wraps_the_cause() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let stop = Arc::new(AtomicUsize::new(0));
    let stop_server = stop.clone();
    let server = thread::spawn(move || {
        let mut held = Vec::new();
        listener.set_nonblocking(true).unwrap();
        while stop_server.load(Ordering::SeqCst) == 0 {
            match listener.accept() {
                Ok((stream, _)) => held.push(stream),
                Err(_) => thread::sleep(Duration::from_millis(10)),
            }
        }
    });

    let config = Config::builder()
        .server(format!("127.0.0.1:{port}"))
        .connect_timeout(2.0)
        .retry_count(1)
        .build()
        .unwrap();
    let mut client = Client::new(config);

    let executions = Arc::new(AtomicUsize::new(0));
    let counter = executions.clone();

    let err = client
        .retry_on_connection_failure(move |_| -> tcp_failover::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::ConnectionFailure {
                server: "fixture".into(),
                cause: Cause::Io(std::io::Error::from(ErrorKind::ConnectionReset)),
            })
        })
        .unwrap_err();

    // retry_count of 1 means the block ran twice.
    assert_eq!(executions.load(Ordering::SeqCst), 2);
    match err {
        Error::ConnectionFailure {
            cause: Cause::RetriesExhausted { retries, .. },
            ..
        } => assert_eq!(retries, 1),
        other => panic!("unexpected error: {other:?}"),
    }

    stop.store(1, Ordering::SeqCst);
    server.join().unwrap();
}

#[test]
fn test_on_connect_runs_once_per_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        for _ in 0..2 {
            let (mut stream, _) = listener.accept().unwrap();
            let mut hello = [0u8; 5];
            stream.read_exact(&mut hello).unwrap();
            assert_eq!(&hello, b"HELLO");
        }
    });

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let config = Config::builder()
        .server(format!("127.0.0.1:{port}"))
        .connect_timeout(2.0)
        .on_connect(move |conn| {
            counter.fetch_add(1, Ordering::SeqCst);
            conn.write(b"HELLO", tcp_failover::Deadline::after(2.0))?;
            Ok(())
        })
        .build()
        .unwrap();
    let mut client = Client::new(config);

    client.connect().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    client.connect().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    client.close();
    server.join().unwrap();
}

#[test]
fn test_custom_policy_drives_address_choice() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let live_port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let _stream = listener.accept().unwrap();
    });

    // The custom selector skips the first (dead) candidate entirely.
    let config = Config::builder()
        .server(format!("127.0.0.1:{}", dead_port()))
        .server(format!("127.0.0.1:{live_port}"))
        .connect_timeout(2.0)
        .connect_retry_count(0)
        .policy(Policy::custom(|addrs, attempt| {
            if attempt == 1 {
                addrs.last().cloned()
            } else {
                None
            }
        }))
        .build()
        .unwrap();
    let mut client = Client::new(config);

    client.connect().unwrap();
    assert_eq!(client.peer().unwrap().port(), live_port);

    client.close();
    server.join().unwrap();
}

#[test]
fn test_custom_policy_yielding_nothing_reports_no_addresses() {
    let config = Config::builder()
        .server("127.0.0.1:1999")
        .connect_retry_count(0)
        .policy(Policy::custom(|_, _| None))
        .build()
        .unwrap();
    let mut client = Client::new(config);

    let err = client.connect().unwrap_err();
    match err {
        Error::ConnectionFailure {
            cause: Cause::NoAddresses,
            ..
        } => {}
        other => panic!("unexpected error: {other:?}"),
    }
}
