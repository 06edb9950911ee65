//! End-to-end tests for the socket command service: real TCP and WebSocket
//! clients against a server whose rate provider talks to a wiremock bank API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Local};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xrates::aggregator::RateAggregator;
use xrates::audit::FileAuditSink;
use xrates::providers::PrivatBankProvider;
use xrates::server::{
    CommandHandler, CommandServer, MAX_COMMAND_LENGTH, ServerState, Transport, UNKNOWN_COMMAND,
};

const MOCK_RESPONSE: &str = r#"{
    "exchangeRate": [
        {"currency": "USD", "saleRate": 41.0},
        {"currency": "EUR", "saleRateNB": 44.5, "purchaseRateNB": 44.5},
        {"currency": "CHF", "saleRate": 46.0, "purchaseRate": 45.0}
    ]
}"#;

struct TestServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    state: tokio::sync::watch::Receiver<ServerState>,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
    audit_dir: tempfile::TempDir,
}

impl TestServer {
    fn audit_path(&self) -> std::path::PathBuf {
        self.audit_dir.path().join("exchange_log.txt")
    }

    async fn shutdown(self) -> ServerState {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not shut down in time")
            .expect("server task panicked")
            .expect("server returned an error");
        *self.state.borrow()
    }
}

async fn mock_bank(delay: Duration) -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/p24api/exchange_rates"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(MOCK_RESPONSE)
                .set_delay(delay),
        )
        .mount(&mock_server)
        .await;

    mock_server
}

async fn start_server(bank_uri: &str) -> TestServer {
    start_server_with(bank_uri, Transport::Lines).await
}

async fn start_server_with(bank_uri: &str, transport: Transport) -> TestServer {
    let provider = PrivatBankProvider::new(bank_uri, Duration::from_secs(5));
    let aggregator = Arc::new(RateAggregator::new(Arc::new(provider)));

    let audit_dir = tempfile::TempDir::new().unwrap();
    let audit = Arc::new(FileAuditSink::new(audit_dir.path().join("exchange_log.txt")));
    let currencies = ["EUR", "USD"].iter().map(|c| c.to_string()).collect();
    let handler = Arc::new(CommandHandler::new(aggregator, audit, currencies));

    let server = CommandServer::bind_with("127.0.0.1:0", transport, handler)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let cancel = server.cancel_token();
    let state = server.subscribe();
    let handle = tokio::spawn(server.run());

    TestServer {
        addr,
        cancel,
        state,
        handle,
        audit_dir,
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Client {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, command: &str) {
        self.writer
            .write_all(format!("{command}\n").as_bytes())
            .await
            .unwrap();
    }

    /// Reads one reply, up to the blank line that terminates it.
    async fn receive(&mut self) -> String {
        let mut response = String::new();
        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).await.unwrap();
            assert!(read > 0, "connection closed mid-response");
            if line == "\n" {
                break;
            }
            response.push_str(&line);
        }
        response.trim_end().to_string()
    }

    async fn request(&mut self, command: &str) -> String {
        self.send(command).await;
        self.receive().await
    }
}

fn date_keys(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|day| day.as_object().unwrap().keys().next().unwrap().clone())
        .collect()
}

#[test_log::test(tokio::test)]
async fn test_unknown_command_keeps_connection_usable() {
    let bank = mock_bank(Duration::ZERO).await;
    let server = start_server(&bank.uri()).await;
    let mut client = Client::connect(server.addr).await;

    assert_eq!(client.request("foobar").await, UNKNOWN_COMMAND);
    assert_eq!(client.request("exchange soon").await, UNKNOWN_COMMAND);

    let response = client.request("exchange 2").await;
    let value: serde_json::Value = serde_json::from_str(&response).unwrap();
    let days = value.as_array().unwrap();
    assert_eq!(days.len(), 2);

    let (_, rates) = days[0].as_object().unwrap().iter().next().unwrap();
    assert_eq!(rates["USD"]["sale"], 41.0);
    assert!(rates["USD"]["purchase"].is_null());
    assert_eq!(rates["EUR"]["purchase"], 44.5);
    assert!(rates.get("CHF").is_none());

    assert_eq!(server.shutdown().await, ServerState::Stopped);
}

#[test_log::test(tokio::test)]
async fn test_exchange_days_are_clamped() {
    let bank = mock_bank(Duration::ZERO).await;
    let server = start_server(&bank.uri()).await;
    let mut client = Client::connect(server.addr).await;

    for (command, expected) in [
        ("exchange", 1),
        ("exchange 15", 10),
        ("exchange 0", 1),
        ("exchange -3", 1),
    ] {
        let response = client.request(command).await;
        let value: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value.as_array().unwrap().len(), expected, "{command}");
    }

    server.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_accepted_commands_are_audited() {
    let bank = mock_bank(Duration::ZERO).await;
    let server = start_server(&bank.uri()).await;
    let mut client = Client::connect(server.addr).await;

    client.request("exchange 3").await;
    client.request("nonsense").await;
    client.request("exchange").await;

    let content = tokio::fs::read_to_string(server.audit_path()).await.unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with('['));
    assert!(lines[0].ends_with("] exchange 3"));
    assert!(lines[1].ends_with("] exchange"));

    server.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_failed_day_is_reported_in_place() {
    let bank = mock_bank(Duration::ZERO).await;
    let yesterday = Local::now()
        .date_naive()
        .checked_sub_days(Days::new(1))
        .unwrap()
        .format("%d.%m.%Y")
        .to_string();

    Mock::given(method("GET"))
        .and(path("/p24api/exchange_rates"))
        .and(query_param("date", yesterday.as_str()))
        .respond_with(ResponseTemplate::new(503))
        .with_priority(1)
        .mount(&bank)
        .await;

    let server = start_server(&bank.uri()).await;
    let mut client = Client::connect(server.addr).await;

    let response = client.request("exchange 3").await;
    let value: serde_json::Value = serde_json::from_str(&response).unwrap();
    let days = value.as_array().unwrap();
    assert_eq!(days.len(), 3);
    assert_eq!(date_keys(&value)[1], yesterday);

    assert!(days[0].as_object().unwrap().values().all(|v| v.is_object()));
    assert_eq!(days[1][&yesterday], "Error fetching data");
    assert!(days[2].as_object().unwrap().values().all(|v| v.is_object()));

    server.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_slow_fetch_does_not_block_other_clients() {
    let bank = mock_bank(Duration::from_millis(800)).await;
    let server = start_server(&bank.uri()).await;

    let mut slow = Client::connect(server.addr).await;
    let mut fast = Client::connect(server.addr).await;

    slow.send("exchange 5").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reply = tokio::time::timeout(Duration::from_millis(400), fast.request("hello"))
        .await
        .expect("a pending fetch on another connection blocked this one");
    assert_eq!(reply, UNKNOWN_COMMAND);

    let response = slow.receive().await;
    let value: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 5);

    server.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_concurrent_exchanges_get_their_own_results() {
    let bank = mock_bank(Duration::from_millis(100)).await;
    let server = start_server(&bank.uri()).await;

    let mut first = Client::connect(server.addr).await;
    let mut second = Client::connect(server.addr).await;

    let (a, b) = tokio::join!(first.request("exchange 2"), second.request("exchange 6"));
    let a: serde_json::Value = serde_json::from_str(&a).unwrap();
    let b: serde_json::Value = serde_json::from_str(&b).unwrap();

    let a_dates = date_keys(&a);
    let b_dates = date_keys(&b);
    assert_eq!(a_dates.len(), 2);
    assert_eq!(b_dates.len(), 6);
    // Same day requested in both, newest first.
    assert_eq!(a_dates[..], b_dates[..2]);

    let today = Local::now().date_naive();
    for (offset, key) in b_dates.iter().enumerate() {
        let expected = today.checked_sub_days(Days::new(offset as u64)).unwrap();
        // Tolerate the clock rolling past midnight mid-test.
        let shifted = expected.checked_sub_days(Days::new(1)).unwrap();
        assert!(
            *key == expected.format("%d.%m.%Y").to_string()
                || *key == shifted.format("%d.%m.%Y").to_string()
        );
    }

    server.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_shutdown_closes_idle_connections() {
    let bank = mock_bank(Duration::ZERO).await;
    let server = start_server(&bank.uri()).await;
    assert_eq!(*server.state.borrow(), ServerState::Listening);

    let mut idle = Client::connect(server.addr).await;
    assert_eq!(idle.request("ping").await, UNKNOWN_COMMAND);

    assert_eq!(server.shutdown().await, ServerState::Stopped);

    let mut line = String::new();
    let read = tokio::time::timeout(Duration::from_secs(2), idle.reader.read_line(&mut line))
        .await
        .expect("connection was not closed on shutdown")
        .unwrap();
    assert_eq!(read, 0);
}

#[test_log::test(tokio::test)]
async fn test_oversized_command_closes_connection() {
    let bank = mock_bank(Duration::ZERO).await;
    let server = start_server(&bank.uri()).await;
    let mut client = Client::connect(server.addr).await;

    let flood = vec![b'x'; MAX_COMMAND_LENGTH * 2];
    client.writer.write_all(&flood).await.unwrap();
    assert_eq!(client.receive().await, UNKNOWN_COMMAND);

    let mut line = String::new();
    let read = tokio::time::timeout(Duration::from_secs(2), client.reader.read_line(&mut line))
        .await
        .expect("connection was not closed after an oversized command")
        .unwrap();
    assert_eq!(read, 0);

    // The listener itself is unaffected.
    let mut other = Client::connect(server.addr).await;
    let response = other.request("exchange").await;
    let value: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 1);

    let content = tokio::fs::read_to_string(server.audit_path()).await.unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("] exchange"));

    assert_eq!(server.shutdown().await, ServerState::Stopped);
}

type WsClient = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

async fn ws_connect(addr: SocketAddr) -> WsClient {
    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    socket
}

async fn ws_request(socket: &mut WsClient, command: &str) -> String {
    socket.send(Message::text(command)).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("no reply from server")
        .expect("connection closed mid-response")
        .unwrap();
    reply.into_text().unwrap().as_str().to_owned()
}

#[test_log::test(tokio::test)]
async fn test_websocket_unknown_command_then_exchange() {
    let bank = mock_bank(Duration::ZERO).await;
    let server = start_server_with(&bank.uri(), Transport::WebSocket).await;
    let mut socket = ws_connect(server.addr).await;

    assert_eq!(ws_request(&mut socket, "foobar").await, UNKNOWN_COMMAND);

    let response = ws_request(&mut socket, "exchange 2").await;
    assert!(!response.ends_with('\n'));
    let value: serde_json::Value = serde_json::from_str(&response).unwrap();
    let days = value.as_array().unwrap();
    assert_eq!(days.len(), 2);

    let (_, rates) = days[0].as_object().unwrap().iter().next().unwrap();
    assert_eq!(rates["USD"]["sale"], 41.0);
    assert_eq!(rates["EUR"]["sale"], 44.5);
    assert!(rates.get("CHF").is_none());

    let content = tokio::fs::read_to_string(server.audit_path()).await.unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("] exchange 2"));

    assert_eq!(server.shutdown().await, ServerState::Stopped);

    // Shutdown ends the session from the server side.
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match socket.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "websocket was not closed on shutdown");
}

#[test_log::test(tokio::test)]
async fn test_websocket_oversized_message_drops_client() {
    let bank = mock_bank(Duration::ZERO).await;
    let server = start_server_with(&bank.uri(), Transport::WebSocket).await;
    let mut socket = ws_connect(server.addr).await;

    let flood = "x".repeat(MAX_COMMAND_LENGTH * 2);
    // The server may drop the connection before the send completes.
    let _ = socket.send(Message::text(flood)).await;

    let ended = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match socket.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "oversized message did not end the session");

    let mut other = ws_connect(server.addr).await;
    let response = ws_request(&mut other, "exchange").await;
    let value: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 1);

    server.shutdown().await;
}
