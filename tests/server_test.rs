// Integration tests for the event server over real TCP connections

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use event_socks::core::EventServer;
use event_socks::EventSocksError;
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(server: &EventServer) -> SocketAddr {
    let addr = server.listen(0).expect("Failed to bind test server");
    SocketAddr::from(([127, 0, 0, 1], addr.port()))
}

async fn connect(addr: SocketAddr) -> Client {
    let url = format!("ws://{}/", addr);
    let (stream, _) = timeout(Duration::from_secs(5), connect_async(url))
        .await
        .expect("WebSocket connection timeout")
        .expect("Failed to establish WebSocket connection");
    stream
}

async fn recv_text(client: &mut Client) -> String {
    match timeout(Duration::from_secs(5), client.next()).await {
        Ok(Some(Ok(msg))) => msg.into_text().expect("Expected a text frame"),
        Ok(Some(Err(e))) => panic!("Error receiving frame: {}", e),
        Ok(None) => panic!("Connection closed unexpectedly"),
        Err(_) => panic!("Timeout waiting for server frame"),
    }
}

async fn assert_silent(client: &mut Client) {
    if let Ok(frame) = timeout(Duration::from_millis(200), client.next()).await {
        panic!("Expected no frame, got {:?}", frame);
    }
}

async fn wait_for_sessions(server: &EventServer, expected: usize) {
    for _ in 0..250 {
        if server.session_count() == expected {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "Expected {} tracked sessions, found {}",
        expected,
        server.session_count()
    );
}

#[tokio::test]
async fn test_dispatch_routes_by_event_name() {
    let server = EventServer::current();
    let calls = Arc::new(Mutex::new(Vec::new()));

    let chat_calls = calls.clone();
    server.on("chat", move |session, body| {
        chat_calls.lock().unwrap().push(format!("chat {}", body));
        session.send("chat-ack", body);
    });
    let ping_calls = calls.clone();
    server.on("ping", move |session, body| {
        ping_calls.lock().unwrap().push(format!("ping {}", body));
        session.send("pong", body);
    });

    let addr = start_server(&server).await;
    let mut client = connect(addr).await;

    client.send(Message::text("chat:hello")).await.unwrap();
    assert_eq!(recv_text(&mut client).await, "chat-ack:hello");

    client.send(Message::text("ping:")).await.unwrap();
    assert_eq!(recv_text(&mut client).await, "pong:");

    assert_eq!(*calls.lock().unwrap(), vec!["chat hello", "ping "]);
}

#[tokio::test]
async fn test_malformed_and_unknown_messages_are_dropped() {
    let server = EventServer::current();
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = invoked.clone();
    server.on("chat", move |session, body| {
        counter.fetch_add(1, Ordering::SeqCst);
        session.send("chat", body);
    });

    let addr = start_server(&server).await;
    let mut client = connect(addr).await;

    client.send(Message::text("no colon at all")).await.unwrap();
    client.send(Message::text("unknownEvent:payload")).await.unwrap();
    assert_silent(&mut client).await;

    // The session survives and keeps dispatching
    client.send(Message::text("chat:still here")).await.unwrap();
    assert_eq!(recv_text(&mut client).await, "chat:still here");
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reregistration_uses_latest_handler() {
    let server = EventServer::current();
    server.on("chat", |session, _| {
        session.send("handler", "h1");
    });
    server.on("chat", |session, _| {
        session.send("handler", "h2");
    });

    let addr = start_server(&server).await;
    let mut client = connect(addr).await;

    client.send(Message::text("chat:anything")).await.unwrap();
    assert_eq!(recv_text(&mut client).await, "handler:h2");
    assert_silent(&mut client).await;
}

#[tokio::test]
async fn test_broadcast_fans_out_to_every_session() {
    let server = EventServer::current();
    let addr = start_server(&server).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect(addr).await);
    }
    wait_for_sessions(&server, 3).await;

    assert_eq!(server.broadcast("x", "y"), 3);
    for client in &mut clients {
        assert_eq!(recv_text(client).await, "x:y");
    }

    assert_eq!(server.emit("x", "again"), 3);
    for client in &mut clients {
        assert_eq!(recv_text(client).await, "x:again");
    }
}

#[tokio::test]
async fn test_messages_from_one_peer_dispatch_in_order() {
    let server = EventServer::current();
    let log = Arc::new(Mutex::new(Vec::new()));
    let handler_log = log.clone();
    server.on("step", move |session, body| {
        handler_log.lock().unwrap().push(format!("start {}", body));
        std::thread::sleep(Duration::from_millis(20));
        handler_log.lock().unwrap().push(format!("end {}", body));
        session.send("done", body);
    });

    let addr = start_server(&server).await;
    let mut client = connect(addr).await;

    client.send(Message::text("step:1")).await.unwrap();
    client.send(Message::text("step:2")).await.unwrap();
    assert_eq!(recv_text(&mut client).await, "done:1");
    assert_eq!(recv_text(&mut client).await, "done:2");

    assert_eq!(
        *log.lock().unwrap(),
        vec!["start 1", "end 1", "start 2", "end 2"]
    );
}

#[tokio::test]
async fn test_failed_session_does_not_affect_others() {
    let server = EventServer::current();
    server.on("echo", |session, body| {
        session.send("echo", body);
    });

    let addr = start_server(&server).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    wait_for_sessions(&server, 2).await;

    // Abrupt drop without a close handshake
    drop(alice);
    wait_for_sessions(&server, 1).await;

    bob.send(Message::text("echo:still alive")).await.unwrap();
    assert_eq!(recv_text(&mut bob).await, "echo:still alive");
    assert_eq!(server.broadcast("after", "drop"), 1);
    assert_eq!(recv_text(&mut bob).await, "after:drop");

    alice = connect(addr).await;
    alice.send(Message::text("echo:back")).await.unwrap();
    assert_eq!(recv_text(&mut alice).await, "echo:back");
}

#[tokio::test]
async fn test_failed_handshake_leaves_accept_loop_running() {
    let server = EventServer::current();
    server.on("echo", |session, body| {
        session.send("echo", body);
    });
    let addr = start_server(&server).await;

    // Tracked while the handshake is pending
    let mut raw = TcpStream::connect(addr).await.unwrap();
    wait_for_sessions(&server, 1).await;
    let pending = server.session_ids();
    assert_eq!(pending.len(), 1);

    raw.write_all(b"definitely not http\r\n\r\n").await.unwrap();
    drop(raw);
    wait_for_sessions(&server, 0).await;
    assert!(server.session(pending[0]).is_none());

    let mut client = connect(addr).await;
    client.send(Message::text("echo:ok")).await.unwrap();
    assert_eq!(recv_text(&mut client).await, "echo:ok");
}

#[tokio::test]
async fn test_clean_close_gets_close_reply() {
    let server = EventServer::current();
    let addr = start_server(&server).await;
    let mut client = connect(addr).await;
    wait_for_sessions(&server, 1).await;

    client.close(None).await.unwrap();
    match timeout(Duration::from_secs(5), client.next()).await {
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {}
        other => panic!("Expected the server to complete the close handshake, got {:?}", other),
    }
    wait_for_sessions(&server, 0).await;
}

#[tokio::test]
async fn test_panicking_handler_session_is_untracked() {
    let server = EventServer::current();
    server.on("boom", |_, _| panic!("handler failure"));
    let addr = start_server(&server).await;

    let mut faulty = connect(addr).await;
    let mut healthy = connect(addr).await;
    wait_for_sessions(&server, 2).await;

    faulty.send(Message::text("boom:x")).await.unwrap();
    wait_for_sessions(&server, 1).await;

    assert_eq!(server.broadcast("still", "here"), 1);
    assert_eq!(recv_text(&mut healthy).await, "still:here");
}

#[tokio::test]
async fn test_listen_fails_when_port_taken() {
    let blocker = StdTcpListener::bind("0.0.0.0:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let server = EventServer::current();
    match server.listen(port) {
        Err(EventSocksError::Bind { addr, .. }) => assert_eq!(addr.port(), port),
        other => panic!("Expected bind failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_oversized_message_ends_session() {
    let server = EventServer::current().with_max_message_size(Some(16));
    server.on("echo", |session, body| {
        session.send("echo", body);
    });
    let addr = start_server(&server).await;

    let mut small = connect(addr).await;
    let mut big = connect(addr).await;
    wait_for_sessions(&server, 2).await;

    big.send(Message::text(format!("echo:{}", "x".repeat(64))))
        .await
        .unwrap();
    wait_for_sessions(&server, 1).await;

    small.send(Message::text("echo:fits")).await.unwrap();
    assert_eq!(recv_text(&mut small).await, "echo:fits");
}
