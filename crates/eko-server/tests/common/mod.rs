//! In-process server and protocol client for integration tests.
//!
//! Connections run over `tokio::io::duplex`, so the whole stack from the
//! handshake down to fan-out is exercised without TLS or sockets.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eko_server::connection::serve_connection;
use eko_server::{ServerConfig, ServerError, ServerState, Store};
use eko_shared::constants::CHALLENGE_SIZE;
use eko_shared::identity::parse_challenge;
use eko_shared::protocol::{
    CreateNetwork, ErrorInfo, FrequenciesInfo, MembersInfo, MessagesInfo, NetworksInfo,
    SetNetworkUser,
};
use eko_shared::{
    Encoding, ErrorCode, Frequency, Framer, Id, Identity, Network, Packet, Payload, User,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

pub fn test_config() -> ServerConfig {
    ServerConfig {
        write_timeout: Duration::from_secs(1),
        handler_timeout: Duration::from_secs(5),
        request_rate: 1000.0,
        request_burst: 1000.0,
        ..ServerConfig::default()
    }
}

pub struct TestServer {
    pub state: Arc<ServerState>,
    shutdown_tx: watch::Sender<()>,
    next_port: AtomicU16,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let store = Store::in_memory(1).unwrap();
        let (shutdown_tx, _) = watch::channel(());
        Self {
            state: Arc::new(ServerState::new(config, store)),
            shutdown_tx,
            next_port: AtomicU16::new(40_000),
        }
    }

    /// A raw, unauthenticated connection and the task serving it.
    pub fn open_stream(&self) -> (DuplexStream, JoinHandle<Result<(), ServerError>>) {
        let deadline = Instant::now() + self.state.config.auth_timeout;
        self.open_stream_until(deadline)
    }

    /// Like [`TestServer::open_stream`], with the handshake due by `deadline`.
    pub fn open_stream_until(
        &self,
        deadline: Instant,
    ) -> (DuplexStream, JoinHandle<Result<(), ServerError>>) {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let peer = SocketAddr::from(([127, 0, 0, 1], port));
        let task = tokio::spawn(serve_connection(
            server,
            peer,
            Arc::clone(&self.state),
            deadline,
            self.shutdown_tx.subscribe(),
        ));
        (client, task)
    }

    /// Answer the challenge as `identity` and leave everything that follows,
    /// initial sync included, on the wire.
    pub async fn connect_unsynced(&self, identity: &Identity) -> TestClient {
        let (mut stream, task) = self.open_stream();
        let nonce = read_challenge(&mut stream).await;
        stream
            .write_all(&identity.answer(&nonce).to_bytes())
            .await
            .unwrap();

        TestClient {
            stream,
            task: Some(task),
            framer: Framer::new(),
            ready: VecDeque::new(),
            pushes: VecDeque::new(),
            encoding: Encoding::Json,
            user: placeholder_user(),
            networks: Vec::new(),
            frequencies: Vec::new(),
        }
    }

    /// Authenticate as `identity` and consume the initial sync.
    pub async fn connect(&self, identity: &Identity) -> TestClient {
        let mut client = self.connect_unsynced(identity).await;

        client.user = match client.recv().await {
            Payload::UserProfileInfo(info) => info.users.into_iter().next().unwrap(),
            other => panic!("expected own profile first, got {other:?}"),
        };
        client.networks = match client.recv().await {
            Payload::NetworksInfo(info) => {
                assert!(info.set);
                info.networks
            }
            other => panic!("expected network list, got {other:?}"),
        };
        for _ in 0..client.networks.len() {
            match client.recv().await {
                Payload::FrequenciesInfo(info) => client.frequencies.push(info),
                other => panic!("expected frequencies, got {other:?}"),
            }
        }
        client
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

pub async fn read_challenge(stream: &mut DuplexStream) -> [u8; 32] {
    let mut challenge = [0u8; CHALLENGE_SIZE];
    tokio::time::timeout(RECV_TIMEOUT, stream.read_exact(&mut challenge))
        .await
        .expect("no challenge")
        .unwrap();
    parse_challenge(&challenge).unwrap()
}

fn placeholder_user() -> User {
    User {
        id: Id(0),
        name: String::new(),
        description: String::new(),
        public_key: [0u8; 32],
        is_public_dm: true,
        is_deleted: false,
    }
}

pub struct TestClient {
    pub stream: DuplexStream,
    pub task: Option<JoinHandle<Result<(), ServerError>>>,
    framer: Framer,
    ready: VecDeque<Packet>,
    /// Packets that arrived while waiting for a reply.
    pub pushes: VecDeque<Payload>,
    pub encoding: Encoding,
    pub user: User,
    pub networks: Vec<Network>,
    pub frequencies: Vec<FrequenciesInfo>,
}

impl TestClient {
    pub fn id(&self) -> Id {
        self.user.id
    }

    pub async fn send(&mut self, payload: impl Into<Payload>) {
        let packet = Packet::new(self.encoding, &payload.into()).unwrap();
        self.stream.write_all(&packet.to_bytes()).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Next packet off the wire, or `None` once the server hung up.
    async fn read_packet(&mut self) -> Option<Payload> {
        loop {
            if let Some(packet) = self.ready.pop_front() {
                return Some(packet.decode().unwrap());
            }
            let mut buf = [0u8; 16 * 1024];
            let n = match self.stream.read(&mut buf).await {
                Ok(n) => n,
                Err(_) => return None,
            };
            if n == 0 {
                return None;
            }
            for item in self.framer.feed(&buf[..n]) {
                self.ready.push_back(item.unwrap());
            }
        }
    }

    pub async fn recv(&mut self) -> Payload {
        tokio::time::timeout(RECV_TIMEOUT, self.read_packet())
            .await
            .expect("timed out waiting for a packet")
            .expect("server closed the connection")
    }

    /// Send a request and wait for its `Error` reply. Everything before it
    /// is kept in [`TestClient::pushes`].
    pub async fn request(&mut self, payload: impl Into<Payload>) -> ErrorInfo {
        self.send(payload).await;
        loop {
            match self.recv().await {
                Payload::Error(info) => return info,
                other => self.pushes.push_back(other),
            }
        }
    }

    pub async fn expect_ok(&mut self, payload: impl Into<Payload>) {
        let reply = self.request(payload).await;
        assert!(reply.is_ok(), "request failed: {reply:?}");
    }

    pub async fn expect_code(&mut self, payload: impl Into<Payload>, code: ErrorCode) {
        let reply = self.request(payload).await;
        assert_eq!(reply.code, code, "unexpected reply: {reply:?}");
    }

    /// Send a query whose reply is a data packet.
    pub async fn query(&mut self, payload: impl Into<Payload>) -> Payload {
        self.send(payload).await;
        self.recv().await
    }

    /// Oldest push, buffered or fresh.
    pub async fn next_push(&mut self) -> Payload {
        match self.pushes.pop_front() {
            Some(payload) => payload,
            None => self.recv().await,
        }
    }

    pub async fn next_messages(&mut self) -> MessagesInfo {
        match self.next_push().await {
            Payload::MessagesInfo(info) => info,
            other => panic!("expected MessagesInfo, got {other:?}"),
        }
    }

    pub async fn next_networks(&mut self) -> NetworksInfo {
        match self.next_push().await {
            Payload::NetworksInfo(info) => info,
            other => panic!("expected NetworksInfo, got {other:?}"),
        }
    }

    pub async fn next_frequencies(&mut self) -> FrequenciesInfo {
        match self.next_push().await {
            Payload::FrequenciesInfo(info) => info,
            other => panic!("expected FrequenciesInfo, got {other:?}"),
        }
    }

    pub async fn next_members(&mut self) -> MembersInfo {
        match self.next_push().await {
            Payload::MembersInfo(info) => info,
            other => panic!("expected MembersInfo, got {other:?}"),
        }
    }

    /// Assert nothing is buffered and nothing arrives for a while.
    pub async fn assert_quiet(&mut self) {
        assert!(self.pushes.is_empty(), "unexpected pushes: {:?}", self.pushes);
        if let Ok(packet) = tokio::time::timeout(QUIET_PERIOD, self.read_packet()).await {
            panic!("unexpected packet: {packet:?}");
        }
    }

    /// Wait for the server to hang up, skipping anything still in flight.
    pub async fn assert_closed(&mut self) {
        let closed = tokio::time::timeout(RECV_TIMEOUT, async {
            while self.read_packet().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "connection still open");
    }

    pub fn clear_pushes(&mut self) {
        self.pushes.clear();
    }

    /// Create a network and return it with its default frequency.
    pub async fn create_network(&mut self, name: &str, is_public: bool) -> (Network, Frequency) {
        self.expect_ok(CreateNetwork {
            name: name.into(),
            icon: "*".into(),
            bg_hex: "#000000".into(),
            fg_hex: "#FFFFFF".into(),
            is_public,
        })
        .await;
        let network = self.next_networks().await.networks.remove(0);
        let frequency = self.next_frequencies().await.frequencies.remove(0);
        assert_eq!(frequency.network_id, network.id);
        (network, frequency)
    }

    /// Join a public network and drain the pushes that come with it.
    pub async fn join(&mut self, network_id: Id) {
        let me = self.id();
        self.expect_ok(SetNetworkUser {
            network_id,
            user_id: me,
            member: Some(true),
            ..Default::default()
        })
        .await;
        self.clear_pushes();
    }
}

/// Two users in one public network owned by the first.
pub async fn network_with_member(
    server: &TestServer,
) -> (TestClient, TestClient, Network, Frequency) {
    let mut owner = server.connect(&Identity::generate()).await;
    let mut member = server.connect(&Identity::generate()).await;
    let (network, frequency) = owner.create_network("den", true).await;
    member.join(network.id).await;
    // MembersInfo and NetworksInfo about the join.
    owner.next_members().await;
    owner.next_networks().await;
    (owner, member, network, frequency)
}
