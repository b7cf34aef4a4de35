//! End-to-end stream (TCP) scenarios over the loopback interface.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sockmux::{Settings, SocketManager};

/// Per-process base port so parallel test runs don't collide.
fn test_port(offset: u16) -> u16 {
    21_000 + (std::process::id() % 30_000) as u16 + offset
}

fn trace_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn server_settings(port: u16) -> Settings {
    Settings {
        port,
        reliable: true,
        accepting: true,
        ..Settings::default()
    }
}

#[test]
fn loopback_delivers_whole_packets_and_observes_close() {
    trace_init();
    let port = test_port(0);
    let mut manager = SocketManager::open(server_settings(port)).unwrap();
    let client = manager.connect("127.0.0.1", port).unwrap();

    let mut active = Vec::new();
    // First poll admits the inbound side; nothing is active yet.
    let n = manager
        .poll(Duration::from_millis(100), &mut active, 4)
        .unwrap();
    assert_eq!(n, 0);
    let accepted = manager.accept(4);
    assert_eq!(accepted.len(), 1);
    let server = accepted[0];

    // Queue a packet and a keepalive; nothing moves before the next poll.
    assert_eq!(
        manager
            .connection_mut(client)
            .unwrap()
            .write(b"hello, world!\n")
            .unwrap(),
        14
    );
    assert_eq!(manager.connection_mut(client).unwrap().write(b"").unwrap(), 0);
    let mut buf = [0u8; 200];
    assert_eq!(
        manager.connection_mut(server).unwrap().read(&mut buf).unwrap(),
        None
    );

    // One poll both drains the client's queue and delivers to the server.
    let n = manager
        .poll(Duration::from_millis(200), &mut active, 4)
        .unwrap();
    assert_eq!(n, 2);
    assert!(active.contains(&client));
    assert!(active.contains(&server));

    let conn = manager.connection_mut(server).unwrap();
    assert_eq!(conn.read(&mut buf).unwrap(), Some(14));
    assert_eq!(&buf[..14], b"hello, world!\n");
    assert_eq!(conn.read(&mut buf).unwrap(), Some(0)); // the keepalive
    assert_eq!(conn.read(&mut buf).unwrap(), None);

    // Dropping the server side closes the client within a couple of polls.
    manager.dispose_connection(server);
    manager.connection_mut(client).unwrap().write(b"X").unwrap();
    for _ in 0..3 {
        if manager.connection(client).unwrap().closed() {
            break;
        }
        manager
            .poll(Duration::from_millis(100), &mut active, 4)
            .unwrap();
    }
    assert!(manager.connection(client).unwrap().closed());
    manager.dispose_connection(client);
}

#[test]
fn notifier_suppresses_active_array_reporting() {
    trace_init();
    let port = test_port(7);
    let mut manager = SocketManager::open(server_settings(port)).unwrap();
    let client = manager.connect("127.0.0.1", port).unwrap();

    let mut active = Vec::new();
    manager
        .poll(Duration::from_millis(100), &mut active, 4)
        .unwrap();
    let server = manager.accept(4)[0];

    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    manager
        .connection_mut(server)
        .unwrap()
        .set_notifier(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

    manager
        .connection_mut(client)
        .unwrap()
        .write(b"ping")
        .unwrap();
    manager
        .poll(Duration::from_millis(200), &mut active, 4)
        .unwrap();

    // The server saw activity but went through its callback, exactly once.
    assert!(!active.contains(&server));
    assert_eq!(hits.load(Ordering::Relaxed), 1);

    let mut buf = [0u8; 64];
    assert_eq!(
        manager.connection_mut(server).unwrap().read(&mut buf).unwrap(),
        Some(4)
    );

    manager.dispose_connection(server);
    manager.dispose_connection(client);
}

#[test]
fn output_backpressure_reports_queue_full_then_recovers() {
    trace_init();
    let port = test_port(13);
    let mut settings = server_settings(port);
    settings.max_message_size = 100;
    settings.max_message_count = 4;
    settings.queue_size = 300;
    let mut manager = SocketManager::open(settings).unwrap();
    let client = manager.connect("127.0.0.1", port).unwrap();

    let mut active = Vec::new();
    manager
        .poll(Duration::from_millis(100), &mut active, 4)
        .unwrap();
    let server = manager.accept(4)[0];

    // Fill the client's output window without polling.
    let conn = manager.connection_mut(client).unwrap();
    for _ in 0..4 {
        conn.write(&[0xAA; 64]).unwrap();
    }
    assert!(matches!(
        conn.write(&[0xAA; 64]),
        Err(sockmux::SessionError::QueueFull)
    ));

    // A poll drains the queue; writing works again.
    manager
        .poll(Duration::from_millis(200), &mut active, 4)
        .unwrap();
    manager
        .connection_mut(client)
        .unwrap()
        .write(&[0xBB; 64])
        .unwrap();

    // The server eventually holds all five packets.
    let mut received = 0;
    let mut buf = [0u8; 128];
    for _ in 0..6 {
        manager
            .poll(Duration::from_millis(100), &mut active, 4)
            .unwrap();
        while let Some(len) = manager
            .connection_mut(server)
            .unwrap()
            .read(&mut buf)
            .unwrap()
        {
            assert_eq!(len, 64);
            received += 1;
        }
        if received == 5 {
            break;
        }
    }
    assert_eq!(received, 5);

    manager.dispose_connection(server);
    manager.dispose_connection(client);
}
