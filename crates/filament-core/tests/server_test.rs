//! Server lifecycle: accept, uniqueness, heartbeat, burst delivery.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use filament_core::{
    tcp::{TcpConn, TcpUpgrader},
    Acceptor, Agent, Conn, MessageListener, Meta, Server, ServiceRegistration, StateListener,
};
use filament_proto::{Frame, OpCode};
use tokio::sync::mpsc;

struct FixedAcceptor {
    id: &'static str,
}

#[async_trait]
impl Acceptor for FixedAcceptor {
    async fn accept(
        &self,
        _conn: &mut dyn Conn,
        _timeout: Duration,
    ) -> filament_core::Result<(String, Meta)> {
        Ok((self.id.to_owned(), Meta::new()))
    }
}

struct CountingListener {
    received: AtomicUsize,
}

#[async_trait]
impl MessageListener for CountingListener {
    async fn receive(&self, _agent: Arc<dyn Agent>, _payload: Bytes) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }
}

struct EchoListener;

#[async_trait]
impl MessageListener for EchoListener {
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Bytes) {
        let _ = agent.push(payload.to_vec()).await;
    }
}

struct DisconnectCounter {
    disconnects: AtomicUsize,
}

#[async_trait]
impl StateListener for DisconnectCounter {
    async fn disconnect(&self, _agent: Arc<dyn Agent>) -> filament_core::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}

fn test_service(id: &str) -> ServiceRegistration {
    ServiceRegistration {
        id: id.into(),
        name: "tgateway".into(),
        protocol: "tcp".into(),
        ..Default::default()
    }
}

async fn start_server(
    acceptor: Arc<dyn Acceptor>,
    listener: Arc<dyn MessageListener>,
    state: Arc<dyn StateListener>,
) -> (Arc<Server>, std::net::SocketAddr) {
    let mut server = Server::new("127.0.0.1:0", test_service("t1"), Arc::new(TcpUpgrader));
    server.set_acceptor(acceptor);
    server.set_message_listener(listener);
    server.set_state_listener(state);

    let server = Arc::new(server);
    let runner = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = runner.start().await;
    });

    let addr = server.wait_bound().await.expect("server bound");

    (server, addr)
}

#[tokio::test]
async fn start_requires_listeners() {
    let server = Arc::new(Server::new(
        "127.0.0.1:0",
        test_service("t1"),
        Arc::new(TcpUpgrader),
    ));

    let err = server.start().await.unwrap_err();
    assert!(err.to_string().contains("state listener"));
}

#[tokio::test]
async fn duplicate_channel_id_is_refused() {
    let (_server, addr) = start_server(
        Arc::new(FixedAcceptor { id: "u1" }),
        Arc::new(CountingListener { received: AtomicUsize::new(0) }),
        Arc::new(DisconnectCounter { disconnects: AtomicUsize::new(0) }),
    )
    .await;

    let mut first = TcpConn::connect(&addr.to_string()).await.unwrap();
    // Give the server time to register the first channel.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut second = TcpConn::connect(&addr.to_string()).await.unwrap();
    let refusal = second.read_frame().await.unwrap();

    assert_eq!(refusal.opcode, OpCode::Close);
    assert_eq!(&refusal.payload[..], b"channelId is repeated");

    // The first connection is still serviceable.
    first.write_frame(OpCode::Ping, &[]).await.unwrap();
    first.flush().await.unwrap();
    let pong = first.read_frame().await.unwrap();
    assert_eq!(pong.opcode, OpCode::Pong);
}

#[tokio::test]
async fn ping_is_answered_and_keeps_the_channel_alive() {
    let (_server, addr) = start_server(
        Arc::new(FixedAcceptor { id: "hb" }),
        Arc::new(CountingListener { received: AtomicUsize::new(0) }),
        Arc::new(DisconnectCounter { disconnects: AtomicUsize::new(0) }),
    )
    .await;

    let mut conn = TcpConn::connect(&addr.to_string()).await.unwrap();

    // Well past a 300 ms deadline if pings were not answered.
    for _ in 0..6 {
        conn.write_frame(OpCode::Ping, &[]).await.unwrap();
        conn.flush().await.unwrap();

        let reply = tokio::time::timeout(Duration::from_millis(300), conn.read_frame())
            .await
            .expect("pong within deadline")
            .unwrap();
        assert_eq!(reply.opcode, OpCode::Pong);

        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn burst_of_pushes_arrives_complete_and_in_order() {
    let (server, addr) = start_server(
        Arc::new(FixedAcceptor { id: "burst" }),
        Arc::new(CountingListener { received: AtomicUsize::new(0) }),
        Arc::new(DisconnectCounter { disconnects: AtomicUsize::new(0) }),
    )
    .await;

    let mut conn = TcpConn::connect(&addr.to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (done_tx, mut done_rx) = mpsc::channel::<Vec<Frame>>(1);
    tokio::spawn(async move {
        let mut frames = Vec::with_capacity(1000);
        while frames.len() < 1000 {
            match conn.read_frame().await {
                Ok(frame) => frames.push(frame),
                Err(_) => break,
            }
        }
        let _ = done_tx.send(frames).await;
    });

    for i in 0..1000u32 {
        let mut payload = vec![0u8; 50];
        payload[..4].copy_from_slice(&i.to_be_bytes());
        server.push("burst", payload).await.unwrap();
    }

    let frames = tokio::time::timeout(Duration::from_secs(10), done_rx.recv())
        .await
        .expect("burst delivered")
        .expect("reader alive");

    assert_eq!(frames.len(), 1000);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(frame.payload.len(), 50);

        let seq = u32::from_be_bytes([
            frame.payload[0],
            frame.payload[1],
            frame.payload[2],
            frame.payload[3],
        ]);
        assert_eq!(seq as usize, i, "frames must arrive in enqueue order");
    }
}

#[tokio::test]
async fn echo_dispatch_reaches_the_listener() {
    let (_server, addr) = start_server(
        Arc::new(FixedAcceptor { id: "echo" }),
        Arc::new(EchoListener),
        Arc::new(DisconnectCounter { disconnects: AtomicUsize::new(0) }),
    )
    .await;

    let mut conn = TcpConn::connect(&addr.to_string()).await.unwrap();
    conn.write_frame(OpCode::Binary, b"hello fabric").await.unwrap();
    conn.flush().await.unwrap();

    let echoed = conn.read_frame().await.unwrap();
    assert_eq!(echoed.opcode, OpCode::Binary);
    assert_eq!(&echoed.payload[..], b"hello fabric");
}

#[tokio::test]
async fn disconnect_fires_once_after_read_loop_exit() {
    let state = Arc::new(DisconnectCounter { disconnects: AtomicUsize::new(0) });
    let (_server, addr) = start_server(
        Arc::new(FixedAcceptor { id: "bye" }),
        Arc::new(CountingListener { received: AtomicUsize::new(0) }),
        Arc::clone(&state) as Arc<dyn StateListener>,
    )
    .await;

    let mut conn = TcpConn::connect(&addr.to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    conn.write_frame(OpCode::Close, &[]).await.unwrap();
    conn.flush().await.unwrap();
    drop(conn);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shutdown_is_idempotent_and_closes_channels() {
    let (server, addr) = start_server(
        Arc::new(FixedAcceptor { id: "down" }),
        Arc::new(CountingListener { received: AtomicUsize::new(0) }),
        Arc::new(DisconnectCounter { disconnects: AtomicUsize::new(0) }),
    )
    .await;

    let _conn = TcpConn::connect(&addr.to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.shutdown().await.unwrap();
    server.shutdown().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.push("down", b"dead".to_vec()).await.is_err());
}
