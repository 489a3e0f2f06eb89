//! End-to-end tests over real localhost TCP: banner, single-client
//! policy, watchdog, and command round trips.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;

use deck_core::{
    Deck, DeckServer, MediaDeck, MediaEngine, Pusher, SimulatedEngine, Slot, TimelineClip,
    Timecode, RATE_25,
};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

// ── Harness ──────────────────────────────────────────────────────

struct Rig {
    server: Arc<DeckServer>,
    addr: SocketAddr,
    deck: Arc<MediaDeck>,
    engine: Arc<SimulatedEngine>,
}

async fn start() -> Rig {
    let engine = SimulatedEngine::new(Duration::from_secs(5));
    let pusher = Pusher::new();
    let deck = MediaDeck::new(
        "FakeDeck",
        "720p5994",
        Arc::clone(&engine) as Arc<dyn MediaEngine>,
        None,
        RATE_25,
        pusher.clone(),
    );
    let server = DeckServer::bind(Arc::clone(&deck) as Arc<dyn Deck>, 0, pusher)
        .await
        .expect("bind ephemeral port");
    let port = server.local_addr().port();
    let runner = Arc::clone(&server);
    tokio::spawn(async move {
        runner.run().await;
    });
    Rig {
        server,
        addr: SocketAddr::from(([127, 0, 0, 1], port)),
        deck,
        engine,
    }
}

async fn add_clip(rig: &Rig, name: &str, secs: u64) {
    let handle = rig.engine.register(Duration::from_secs(secs));
    let duration = Timecode::from_duration(Duration::from_secs(secs), RATE_25);
    rig.deck
        .timeline()
        .add_clip(TimelineClip::new(name, handle, duration))
        .await
        .unwrap();
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = timeout(IO_TIMEOUT, TcpStream::connect(addr))
            .await
            .expect("connect timed out")
            .expect("connect failed");
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    /// Connect with an explicit local source address, to present a
    /// different loopback IP to the server.
    async fn connect_from(local: &str, addr: SocketAddr) -> Self {
        let socket = TcpSocket::new_v4().expect("socket");
        socket.bind(local.parse().expect("local addr")).expect("bind local");
        let stream = timeout(IO_TIMEOUT, socket.connect(addr))
            .await
            .expect("connect timed out")
            .expect("connect failed");
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        let msg = format!("{line}\r\n");
        timeout(IO_TIMEOUT, self.writer.write_all(msg.as_bytes()))
            .await
            .expect("write timed out")
            .expect("write failed");
    }

    /// Read one line, stripped of its terminator. `None` on EOF.
    async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = timeout(IO_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("read timed out")
            .expect("read failed");
        if n == 0 {
            return None;
        }
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Read lines up to and excluding the terminating blank line.
    async fn read_block(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await.expect("EOF inside block");
            if line.is_empty() {
                return lines;
            }
            lines.push(line);
        }
    }

    async fn expect_banner(&mut self) {
        let banner = self.read_block().await;
        assert_eq!(
            banner,
            vec![
                "500 connection info:",
                "protocol version: 1.11",
                "model: FakeDeck",
            ]
        );
    }
}

// ── Connection lifecycle ─────────────────────────────────────────

#[tokio::test]
async fn banner_then_ping() {
    let rig = start().await;
    let mut client = Client::connect(rig.addr).await;
    client.expect_banner().await;

    client.send("ping").await;
    assert_eq!(client.read_line().await.as_deref(), Some("200 ok"));
}

#[tokio::test]
async fn blank_lines_are_ignored() {
    let rig = start().await;
    let mut client = Client::connect(rig.addr).await;
    client.expect_banner().await;

    client.send("").await;
    client.send("ping").await;
    assert_eq!(client.read_line().await.as_deref(), Some("200 ok"));
}

#[tokio::test]
async fn second_ip_is_rejected_while_first_stays_bound() {
    let rig = start().await;
    let mut first = Client::connect(rig.addr).await;
    first.expect_banner().await;

    let mut second = Client::connect_from("127.0.0.2:0", rig.addr).await;
    assert_eq!(
        second.read_line().await.as_deref(),
        Some("120 connection rejected")
    );
    assert_eq!(second.read_line().await, None);

    // The bound session was untouched.
    first.send("ping").await;
    assert_eq!(first.read_line().await.as_deref(), Some("200 ok"));
}

#[tokio::test]
async fn same_ip_reconnect_displaces_stale_session() {
    let rig = start().await;
    let mut stale = Client::connect(rig.addr).await;
    stale.expect_banner().await;

    let mut fresh = Client::connect(rig.addr).await;
    fresh.expect_banner().await;
    fresh.send("ping").await;
    assert_eq!(fresh.read_line().await.as_deref(), Some("200 ok"));

    // The displaced session was closed.
    assert_eq!(stale.read_line().await, None);
}

#[tokio::test]
async fn write_error_frees_the_binding() {
    let rig = start().await;

    // Reset the connection immediately (linger 0 sends an RST) so the
    // server's banner write fails.
    let stream = timeout(IO_TIMEOUT, TcpStream::connect(rig.addr))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    stream.set_linger(Some(Duration::ZERO)).expect("set linger");
    drop(stream);

    tokio::time::sleep(Duration::from_millis(500)).await;

    // The dead session must not keep its IP bound; a client from a
    // different address binds normally instead of being rejected.
    let mut next = Client::connect_from("127.0.0.2:0", rig.addr).await;
    next.expect_banner().await;
    next.send("ping").await;
    assert_eq!(next.read_line().await.as_deref(), Some("200 ok"));
}

#[tokio::test]
async fn quit_frees_the_binding() {
    let rig = start().await;
    let mut client = Client::connect(rig.addr).await;
    client.expect_banner().await;

    client.send("quit").await;
    assert_eq!(client.read_line().await, None);

    // A different IP can now bind.
    let mut next = Client::connect_from("127.0.0.2:0", rig.addr).await;
    next.expect_banner().await;
}

#[tokio::test]
async fn watchdog_expires_and_frees_the_binding() {
    let rig = start().await;
    let mut client = Client::connect(rig.addr).await;
    client.expect_banner().await;

    client.send("watchdog: period: 1").await;
    assert_eq!(client.read_line().await.as_deref(), Some("200 ok"));

    // Go silent past the period; the server closes the session.
    assert_eq!(client.read_line().await, None);

    let mut next = Client::connect_from("127.0.0.2:0", rig.addr).await;
    next.expect_banner().await;
}

#[tokio::test]
async fn watchdog_period_zero_disarms() {
    let rig = start().await;
    let mut client = Client::connect(rig.addr).await;
    client.expect_banner().await;

    client.send("watchdog: period: 1").await;
    assert_eq!(client.read_line().await.as_deref(), Some("200 ok"));
    client.send("watchdog: period: 0").await;
    assert_eq!(client.read_line().await.as_deref(), Some("200 ok"));

    // Well past the old period the session is still alive.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    client.send("ping").await;
    assert_eq!(client.read_line().await.as_deref(), Some("200 ok"));
}

#[tokio::test]
async fn watchdog_malformed_period_is_syntax_error() {
    let rig = start().await;
    let mut client = Client::connect(rig.addr).await;
    client.expect_banner().await;

    client.send("watchdog: period: soon").await;
    assert_eq!(
        client.read_line().await.as_deref(),
        Some("100 syntax error")
    );
    client.send("watchdog").await;
    assert_eq!(
        client.read_line().await.as_deref(),
        Some("100 syntax error")
    );
}

#[tokio::test]
async fn server_stop_closes_live_session() {
    let rig = start().await;
    let mut client = Client::connect(rig.addr).await;
    client.expect_banner().await;

    rig.server.stop().await;
    assert_eq!(client.read_line().await, None);
}

// ── Command round trips ──────────────────────────────────────────

#[tokio::test]
async fn transport_info_round_trip() {
    let rig = start().await;
    add_clip(&rig, "a.mp4", 60).await;

    let mut client = Client::connect(rig.addr).await;
    client.expect_banner().await;

    client.send("transport info").await;
    let block = client.read_block().await;
    assert_eq!(block[0], "208 transport info:");
    assert!(block.contains(&"status: stopped".to_string()));
    assert!(block.contains(&"clip id: 1".to_string()));
    assert!(block.contains(&"timecode: 00:00:00:00".to_string()));
}

#[tokio::test]
async fn unknown_command_round_trip() {
    let rig = start().await;
    let mut client = Client::connect(rig.addr).await;
    client.expect_banner().await;

    client.send("record: name: test").await;
    assert_eq!(client.read_line().await.as_deref(), Some("103 unsupported"));
}

#[tokio::test]
async fn play_emits_async_transport_push() {
    let rig = start().await;
    add_clip(&rig, "a.mp4", 60).await;

    let mut client = Client::connect(rig.addr).await;
    client.expect_banner().await;

    client.send("play").await;
    assert_eq!(client.read_line().await.as_deref(), Some("200 ok"));

    // The settle-delayed 508 push arrives on the same socket.
    let push = client.read_block().await;
    assert_eq!(push[0], "508 transport info:");
    assert!(push.contains(&"status: play".to_string()));
    assert!(push.contains(&"clip id: 1".to_string()));
}

#[tokio::test]
async fn notify_enables_position_pushes() {
    let rig = start().await;
    add_clip(&rig, "a.mp4", 60).await;

    let mut client = Client::connect(rig.addr).await;
    client.expect_banner().await;

    client.send("notify: timeline position: true").await;
    assert_eq!(client.read_line().await.as_deref(), Some("200 ok"));
    client.send("play").await;
    assert_eq!(client.read_line().await.as_deref(), Some("200 ok"));

    // Within a few engine ticks a 514 must show up among the pushes.
    let deadline = tokio::time::Instant::now() + IO_TIMEOUT;
    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "no timeline position push arrived"
        );
        let block = client.read_block().await;
        if block[0] == "514 timeline position:" {
            assert!(block[1].starts_with("timeline: "));
            break;
        }
    }
}

#[tokio::test]
async fn catalog_is_served_from_a_mounted_slot() {
    let rig = start().await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.mp4"), b"media").unwrap();
    std::fs::write(dir.path().join("a.mp4"), b"media").unwrap();
    let slot = Slot::mount(
        1,
        dir.path(),
        Arc::clone(&rig.engine) as Arc<dyn MediaEngine>,
        RATE_25,
    )
    .await
    .unwrap();
    rig.deck.attach_slot(slot).await.unwrap();

    let mut client = Client::connect(rig.addr).await;
    client.expect_banner().await;

    client.send("disk list").await;
    let block = client.read_block().await;
    assert_eq!(block[0], "206 disk list:");
    assert_eq!(block[1], "slot id: 1");
    assert!(block[2].starts_with("1: a.mp4 QuickTimeProResLT 720p5994"));
    assert!(block[3].starts_with("2: b.mp4 QuickTimeProResLT 720p5994"));

    client.send("slot info").await;
    let block = client.read_block().await;
    assert_eq!(block[0], "202 slot info:");
    assert!(block.contains(&"status: mounted".to_string()));
    assert!(block.contains(&"blocked: false".to_string()));

    // The catalog also fed the timeline.
    client.send("clips count").await;
    let block = client.read_block().await;
    assert_eq!(block, vec!["214 clips count:", "clip count: 2"]);
}
