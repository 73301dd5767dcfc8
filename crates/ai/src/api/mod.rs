//! The client side of the Zappy protocol.
//!
//! The stream is split after the handshake: a background task reads and
//! classifies every inbound line, pushing asynchronous events into a shared
//! queue and forwarding everything else into the response channel. Command
//! methods write one line and block on that channel, so at most one command
//! is ever outstanding.

pub mod error;
pub mod message;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::mpsc,
    time::{Instant, timeout, timeout_at},
};
use tracing::{debug, trace, warn};

pub use self::error::{ClientError, Result};
pub use self::message::{Event, Inventory, Resource, Tile};
use self::message::{Inbound, parse_inventory, parse_tiles};

/// Time budget for most commands.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);
/// `Inventory` and `Connect_nbr` are answered quickly by the server.
const QUERY_TIMEOUT: Duration = Duration::from_secs(3);
/// `Fork` takes 42 time units.
const FORK_TIMEOUT: Duration = Duration::from_secs(45);
/// Each phase of an incantation can take up to 300 time units.
const INCANTATION_TIMEOUT: Duration = Duration::from_secs(305);
/// The whole handshake must complete within this budget.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Where the connection currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    /// The server announced our death; commands are meaningless.
    Dead,
    /// The stream is gone, either from an I/O error or a local shutdown.
    Closed,
}

/// The result of the handshake with the server.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// The width of the world we are playing in.
    pub width: u32,
    /// The height of the world we are playing in.
    pub height: u32,
    /// The number of connections the server can still accept for our team.
    pub open_team_slots: u32,
}

/// Contains the state to interact with a Zappy server.
pub struct ZappyClient {
    /// The write half of the connection.
    writer: Writer,
    /// Responses to commands, in send order.
    responses: mpsc::Receiver<String>,
    /// Events gathered by the reader task since the last poll.
    events: Arc<Mutex<Vec<Event>>>,
    /// Set by the reader task when the server announces our death.
    dead: Arc<AtomicBool>,
    /// Set once an I/O failure or EOF has been observed.
    closed: bool,
    /// Number of timed-out commands whose response is still owed; the next
    /// responses that arrive are discarded instead of satisfying a command.
    stale_responses: usize,
}

impl ZappyClient {
    /// Opens a TCP connection to the server and performs the handshake.
    pub async fn connect(host: &str, port: u16, team_name: &str) -> Result<(Self, Handshake)> {
        trace!(
            from = ?ConnectionState::Disconnected,
            to = ?ConnectionState::Connecting,
            "connecting to {host}:{port}"
        );
        let stream = TcpStream::connect((host, port)).await?;
        Self::new(stream, team_name).await
    }

    /// Creates a client from an already-connected stream, performing the
    /// handshake before spawning the reader task.
    pub async fn new<S>(stream: S, team_name: &str) -> Result<(Self, Handshake)>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        trace!(state = ?ConnectionState::Handshaking, "starting handshake");
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader: Reader = BufReader::new(Box::new(read_half));
        let mut writer: Writer = Box::new(write_half);

        let handshake = timeout(
            HANDSHAKE_TIMEOUT,
            perform_handshake(&mut reader, &mut writer, team_name),
        )
        .await
        .map_err(|_| ClientError::Handshake("handshake timed out".to_owned()))??;

        trace!(state = ?ConnectionState::Ready, ?handshake, "handshake complete");

        let (response_sender, responses) = mpsc::channel(16);
        let events = Arc::new(Mutex::new(Vec::new()));
        let dead = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_reader(
            reader,
            response_sender,
            events.clone(),
            dead.clone(),
        ));

        Ok((
            Self {
                writer,
                responses,
                events,
                dead,
                closed: false,
                stale_responses: 0,
            },
            handshake,
        ))
    }

    /// Where the connection currently stands.
    pub fn state(&self) -> ConnectionState {
        if self.closed {
            ConnectionState::Closed
        } else if self.is_dead() {
            ConnectionState::Dead
        } else {
            ConnectionState::Ready
        }
    }

    /// Whether the server has announced our death.
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Relaxed)
    }

    /// Drains the events received from the server since the last call.
    pub fn poll_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Requests the server to advance by one tile.
    pub async fn forward(&mut self) -> Result<bool> {
        self.simple("Forward", DEFAULT_TIMEOUT).await
    }

    /// Requests the server to turn 90 degrees right.
    pub async fn turn_right(&mut self) -> Result<bool> {
        self.simple("Right", DEFAULT_TIMEOUT).await
    }

    /// Requests the server to turn 90 degrees left.
    pub async fn turn_left(&mut self) -> Result<bool> {
        self.simple("Left", DEFAULT_TIMEOUT).await
    }

    /// Requests the tiles visible from the current position.
    pub async fn look(&mut self) -> Result<Vec<Tile>> {
        let response = self.request("Look", DEFAULT_TIMEOUT).await?;
        parse_tiles(&response)
    }

    /// Requests the content of our inventory.
    pub async fn inventory(&mut self) -> Result<Inventory> {
        let response = self.request("Inventory", QUERY_TIMEOUT).await?;
        parse_inventory(&response)
    }

    /// Requests the number of unused slots left in our team.
    pub async fn connect_nbr(&mut self) -> Result<u32> {
        let response = self.request("Connect_nbr", QUERY_TIMEOUT).await?;
        response
            .trim()
            .parse()
            .map_err(|_| ClientError::Parse(format!("invalid slot count: {response:?}")))
    }

    /// Requests to pick up one unit of a resource from the current tile.
    pub async fn take(&mut self, resource: Resource) -> Result<bool> {
        let line = format!("Take {}", resource.name());
        self.simple(&line, DEFAULT_TIMEOUT).await
    }

    /// Requests to drop one unit of a resource onto the current tile.
    pub async fn set(&mut self, resource: Resource) -> Result<bool> {
        let line = format!("Set {}", resource.name());
        self.simple(&line, DEFAULT_TIMEOUT).await
    }

    /// Broadcasts a message to every player on the map.
    pub async fn broadcast(&mut self, text: &str) -> Result<bool> {
        debug_assert!(!text.contains('\n'));
        let line = format!("Broadcast \"{text}\"");
        self.simple(&line, DEFAULT_TIMEOUT).await
    }

    /// Requests the server to lay an egg, opening a team slot.
    pub async fn fork(&mut self) -> Result<bool> {
        self.simple("Fork", FORK_TIMEOUT).await
    }

    /// Requests the server to push every other player off the current tile.
    #[allow(dead_code)]
    pub async fn eject(&mut self) -> Result<bool> {
        self.simple("Eject", DEFAULT_TIMEOUT).await
    }

    /// Starts the elevation ritual.
    ///
    /// Returns `Ok(None)` when the server refuses (`ko`), and `Ok(Some(n))`
    /// with the new level on success. The two-phase wait (`Elevation
    /// underway` then `Current level: N`) is one operation from the caller's
    /// perspective.
    pub async fn incantation(&mut self) -> Result<Option<u32>> {
        self.write_line("Incantation").await?;

        let first = self.wait_response(INCANTATION_TIMEOUT).await?;
        if first == "ko" {
            return Ok(None);
        }
        // Some servers skip the announcement and send the level directly.
        if let Some(level) = parse_current_level(&first) {
            return Ok(Some(level?));
        }
        if !first.starts_with("Elevation underway") {
            return Err(ClientError::UnexpectedResponse(first));
        }

        let second = self.wait_response(INCANTATION_TIMEOUT).await?;
        match parse_current_level(&second) {
            Some(level) => Ok(Some(level?)),
            None => Err(ClientError::UnexpectedResponse(second)),
        }
    }

    /// Sends a command expecting a plain `ok`/`ko` answer.
    async fn simple(&mut self, line: &str, limit: Duration) -> Result<bool> {
        let response = self.request(line, limit).await?;
        match response.as_str() {
            "ok" => Ok(true),
            "ko" => Ok(false),
            _ => Err(ClientError::UnexpectedResponse(response)),
        }
    }

    /// Sends one line and waits for the matching response.
    async fn request(&mut self, line: &str, limit: Duration) -> Result<String> {
        self.write_line(line).await?;
        self.wait_response(limit).await
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let result = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await
        }
        .await;

        if let Err(err) = result {
            debug!(error = %err, "write failed, closing connection");
            self.closed = true;
            return Err(ClientError::ConnectionClosed);
        }
        Ok(())
    }

    /// Waits for the next response, discarding any that belong to commands
    /// that already timed out.
    async fn wait_response(&mut self, limit: Duration) -> Result<String> {
        let deadline = Instant::now() + limit;
        loop {
            let received = match timeout_at(deadline, self.responses.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    // The response is still owed; it must not satisfy a
                    // later command.
                    self.stale_responses += 1;
                    return Err(ClientError::Timeout);
                }
            };
            let Some(response) = received else {
                self.closed = true;
                return Err(ClientError::ConnectionClosed);
            };
            if self.stale_responses > 0 {
                self.stale_responses -= 1;
                debug!(response, "discarding response to a timed-out command");
                continue;
            }
            return Ok(response);
        }
    }
}

fn parse_current_level(response: &str) -> Option<Result<u32>> {
    let rest = response.strip_prefix("Current level:")?;
    let level = rest.split_ascii_whitespace().next().unwrap_or("");
    Some(
        level
            .parse()
            .map_err(|_| ClientError::Parse(format!("invalid level: {response:?}"))),
    )
}

/// Performs the handshake with the server, providing the team name.
async fn perform_handshake(
    reader: &mut Reader,
    writer: &mut Writer,
    team_name: &str,
) -> Result<Handshake> {
    let mut buffer = Vec::new();

    let welcome = read_trimmed_line(reader, &mut buffer).await?;
    if welcome != "WELCOME" {
        return Err(ClientError::Handshake(format!(
            "expected WELCOME, got {welcome:?}"
        )));
    }

    writer.write_all(team_name.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let slots = read_trimmed_line(reader, &mut buffer).await?;
    let open_team_slots: u32 = slots
        .parse()
        .map_err(|_| ClientError::Handshake(format!("invalid team slot count: {slots:?}")))?;

    let dimensions = read_trimmed_line(reader, &mut buffer).await?;
    let mut fields = dimensions.split_ascii_whitespace();
    let mut next_dimension = || {
        fields
            .next()
            .and_then(|f| f.parse::<u32>().ok())
            .ok_or_else(|| ClientError::Handshake(format!("invalid map size: {dimensions:?}")))
    };
    let width = next_dimension()?;
    let height = next_dimension()?;

    Ok(Handshake {
        width,
        height,
        open_team_slots,
    })
}

async fn read_trimmed_line(reader: &mut Reader, buffer: &mut Vec<u8>) -> Result<String> {
    buffer.clear();
    let read = reader.read_until(b'\n', buffer).await?;
    if read == 0 {
        return Err(ClientError::ConnectionClosed);
    }
    let text = str::from_utf8(buffer)
        .map_err(|_| ClientError::Parse("line is not valid UTF-8".to_owned()))?;
    Ok(text.trim_end().to_owned())
}

/// The task responsible for the read half of the stream.
///
/// It must keep making progress while the strategy blocks on a response,
/// otherwise the two-message incantation sequence would deadlock. Dropping
/// the response sender on exit releases any blocked waiter.
async fn run_reader(
    mut reader: Reader,
    responses: mpsc::Sender<String>,
    events: Arc<Mutex<Vec<Event>>>,
    dead: Arc<AtomicBool>,
) {
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "read failed, closing connection");
                break;
            }
        }

        let Ok(line) = str::from_utf8(&buffer) else {
            warn!("dropping non-UTF-8 line");
            continue;
        };
        let line = line.trim_end();

        match message::classify(line) {
            Ok(Inbound::Event(event)) => {
                if event == Event::Dead {
                    dead.store(true, Ordering::Relaxed);
                }
                events.lock().push(event);
            }
            Ok(Inbound::Response(response)) => {
                if responses.send(response).await.is_err() {
                    break;
                }
            }
            Err(err) => warn!(line, error = %err, "dropping undecodable line"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};

    async fn server_expect(server: &mut DuplexStream, expected: &str) {
        let mut buffer = vec![0; expected.len()];
        server.read_exact(&mut buffer).await.unwrap();
        assert_eq!(buffer, expected.as_bytes());
    }

    async fn handshaken_client(team: &str) -> (ZappyClient, Handshake, DuplexStream) {
        let (client_side, mut server) = duplex(1024);
        let client = tokio::spawn({
            let team = team.to_owned();
            async move { ZappyClient::new(client_side, &team).await }
        });

        server.write_all(b"WELCOME\n").await.unwrap();
        server_expect(&mut server, &format!("{team}\n")).await;
        server.write_all(b"3\n").await.unwrap();
        server.write_all(b"10 10\n").await.unwrap();

        let (client, handshake) = client.await.unwrap().unwrap();
        (client, handshake, server)
    }

    #[tokio::test]
    async fn handshake_reports_slots_and_map() {
        let (client, handshake, _server) = handshaken_client("red").await;
        assert_eq!(handshake.open_team_slots, 3);
        assert_eq!((handshake.width, handshake.height), (10, 10));
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn handshake_rejects_deviations() {
        let (client_side, mut server) = duplex(1024);
        let client =
            tokio::spawn(async move { ZappyClient::new(client_side, "red").await.map(|_| ()) });

        server.write_all(b"HELLO\n").await.unwrap();

        assert!(matches!(
            client.await.unwrap(),
            Err(ClientError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn commands_pair_with_responses_in_order() {
        let (mut client, _, mut server) = handshaken_client("red").await;

        let server_task = tokio::spawn(async move {
            server_expect(&mut server, "Forward\n").await;
            server.write_all(b"ok\n").await.unwrap();
            server_expect(&mut server, "Take food\n").await;
            server.write_all(b"ko\n").await.unwrap();
            server_expect(&mut server, "Eject\n").await;
            server.write_all(b"ok\n").await.unwrap();
            server
        });

        assert!(client.forward().await.unwrap());
        assert!(!client.take(Resource::Food).await.unwrap());
        assert!(client.eject().await.unwrap());
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_is_quoted_on_the_wire() {
        let (mut client, _, mut server) = handshaken_client("red").await;

        let server_task = tokio::spawn(async move {
            server_expect(&mut server, "Broadcast \"hello\"\n").await;
            server.write_all(b"ok\n").await.unwrap();
            server
        });

        assert!(client.broadcast("hello").await.unwrap());
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn incantation_reports_the_new_level() {
        let (mut client, _, mut server) = handshaken_client("red").await;

        let server_task = tokio::spawn(async move {
            server_expect(&mut server, "Incantation\n").await;
            server.write_all(b"Elevation underway\n").await.unwrap();
            server.write_all(b"Current level: 2\n").await.unwrap();
            server
        });

        assert_eq!(client.incantation().await.unwrap(), Some(2));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn incantation_refusal_is_not_an_error() {
        let (mut client, _, mut server) = handshaken_client("red").await;

        let server_task = tokio::spawn(async move {
            server_expect(&mut server, "Incantation\n").await;
            server.write_all(b"ko\n").await.unwrap();
            server
        });

        assert_eq!(client.incantation().await.unwrap(), None);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn late_responses_never_satisfy_a_later_command() {
        let (mut client, _, mut server) = handshaken_client("red").await;

        // No response within the budget: the command times out.
        let err = client
            .request("Forward", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));

        // The late response arrives, followed by the answer to the next
        // command; the stale one must be skipped.
        let server_task = tokio::spawn(async move {
            server_expect(&mut server, "Forward\nLook\n").await;
            server.write_all(b"ok\n").await.unwrap();
            server.write_all(b"[player]\n").await.unwrap();
            server
        });

        let tiles = client.look().await.unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].players, 1);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn events_are_queued_without_blocking_commands() {
        let (mut client, _, mut server) = handshaken_client("red").await;

        let server_task = tokio::spawn(async move {
            server_expect(&mut server, "Inventory\n").await;
            server
                .write_all(b"message 2, \"hi team\"\neject: 1\n[food 9]\n")
                .await
                .unwrap();
            server
        });

        let inventory = client.inventory().await.unwrap();
        assert_eq!(inventory.food(), 9);
        let events = client.poll_events();
        assert_eq!(
            events,
            vec![
                Event::Broadcast {
                    direction: 2,
                    text: "hi team".to_owned()
                },
                Event::Ejected { direction: 1 },
            ]
        );
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn death_flips_the_flag() {
        let (mut client, _, mut server) = handshaken_client("red").await;

        server.write_all(b"dead\n").await.unwrap();

        // Wait for the reader task to process the line.
        while !client.is_dead() {
            tokio::task::yield_now().await;
        }
        assert_eq!(client.state(), ConnectionState::Dead);
        assert_eq!(client.poll_events(), vec![Event::Dead]);
    }

    #[tokio::test]
    async fn eof_releases_blocked_waiters() {
        let (mut client, _, server) = handshaken_client("red").await;

        drop(server);

        let err = client.forward().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
        assert_eq!(client.state(), ConnectionState::Closed);
    }
}
