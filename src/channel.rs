use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};
use tokio::{spawn, task};
use tracing::{debug, info, warn};

use crate::command::{Command, TelloCommand};
use crate::config::TelloConfig;
use crate::errors::{Result, TelloError};
use crate::response::{Dispatch, ResponseQueue};

const RESPONSE_BUFFER_SIZE: usize = 1024;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Where the connection is in its life. `Flying` is entered when a takeoff
/// is acknowledged and left on a land acknowledgment or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Flying,
}

/// What an error interceptor wants done about a failed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Continue,
    Abort,
}

/// Called with every timeout, rejection or protocol error in place of the
/// default abort.
pub type ErrorInterceptor = Box<dyn Fn(&TelloError) -> ErrorAction + Send + Sync>;

type ReplyPromise = oneshot::Sender<Result<String>>;

enum Outbound {
    Request { text: String, reply: ReplyPromise },
    Notify { text: String, sent: oneshot::Sender<Result<()>> },
    DropExpired,
    Close,
}

/// The control connection: one UDP socket to the drone's command port and
/// the queue of commands still waiting for a reply.
///
/// The socket and the queue are owned by a single background task. Callers
/// hand it commands in order and wait on their own reply, each with its own
/// timeout, so several commands may be outstanding at once. Replies that
/// arrive with nothing waiting are failures of the connection as a whole and
/// go through the same interceptor or abort as a failed command.
pub struct CommandChannel {
    link: Arc<Link>,
    task: task::JoinHandle<()>,
}

/// The parts of a channel that failures reported by the socket task need.
struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,
    local_addr: SocketAddr,
    state: watch::Sender<ConnectionState>,
    aborted: AtomicBool,
    interceptor: Option<ErrorInterceptor>,
    land_timeout: Duration,
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel")
            .field("local_addr", &self.link.local_addr)
            .field("state", &self.state())
            .field("aborted", &self.link.aborted.load(Ordering::SeqCst))
            .field("intercepted", &self.link.interceptor.is_some())
            .finish_non_exhaustive()
    }
}

impl CommandChannel {
    pub async fn open(config: &TelloConfig) -> Result<Self> {
        Self::open_with(config, None).await
    }

    /// Opens the channel with `interceptor`, if given, deciding what happens
    /// after each failure instead of the abort sequence.
    pub async fn open_with(config: &TelloConfig, interceptor: Option<ErrorInterceptor>) -> Result<Self> {
        let local_address = format!("0.0.0.0:{}", config.local_control_port);
        let drone_address = config.drone_address();

        info!("OPEN {local_address} → {drone_address}");

        debug!("binding local {local_address}...");
        let sock = UdpSocket::bind(&local_address).await?;

        debug!("connecting to drone at {drone_address}...");
        let attempts = config.connect_attempts.max(1);
        let mut i = 0;
        loop {
            i += 1;
            match sock.connect(&drone_address).await {
                Ok(_) => break,
                Err(err) if i < attempts => {
                    warn!("connection attempt #{i} failed ({err}), retrying...");
                    sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let local_addr = sock.local_addr()?;
        let (outbound, requests) = mpsc::unbounded_channel();
        let (faults, fault_receiver) = mpsc::unbounded_channel();
        let task = spawn(run_socket(sock, requests, faults, config.echo_check));
        let (state, _) = watch::channel(ConnectionState::Connected);

        let link = Arc::new(Link {
            outbound,
            local_addr,
            state,
            aborted: AtomicBool::new(false),
            interceptor,
            land_timeout: config.response_timeout(),
        });
        spawn(handle_faults(Arc::downgrade(&link), fault_receiver));

        Ok(Self { link, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.link.local_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.link.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn is_flying(&self) -> bool {
        self.link.is_flying()
    }

    /// Moves between `Connected` and `Flying`. A closed channel stays closed.
    pub(crate) fn set_state(&self, new_state: ConnectionState) {
        self.link.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected || *state == new_state {
                return false;
            }
            *state = new_state;
            true
        });
    }

    /// Sends a command that must be answered with "ok".
    pub async fn send(&self, command: &Command) -> Result<()> {
        self.send_expect(command, |response| (response == "ok").then_some(())).await
    }

    /// Sends a command and reads its reply with `parse`. A reply `parse`
    /// can't make sense of counts as a rejection by the drone.
    pub async fn send_expect<T>(
        &self,
        command: &Command,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Result<T> {
        let outcome = match self.link.request(command).await {
            Ok(response) => match parse(&response) {
                Some(value) => Ok(value),
                None => Err(TelloError::DroneRejected { command: command.text().to_string(), response }),
            },
            Err(err) => Err(err),
        };

        if let Err(err) = &outcome {
            self.link.handle_failure(err).await;
        }

        outcome
    }

    /// Sends a command the drone never answers, such as `rc`.
    pub async fn send_without_reply(&self, command: &Command) -> Result<()> {
        if !self.is_connected() {
            return Err(TelloError::NotConnected);
        }

        debug!("SEND {} (no reply expected)", command.text());
        let (sent, rx) = oneshot::channel();
        self.link
            .outbound
            .send(Outbound::Notify { text: command.text().to_string(), sent })
            .map_err(|_| TelloError::NotConnected)?;

        rx.await
            .map_err(|_| TelloError::Cancelled { command: command.text().to_string() })?
    }

    /// Lands if flying, then closes. Only the first call on a connection
    /// does anything.
    pub async fn abort(&self) {
        self.link.abort().await;
    }

    /// Closes the socket. Commands still waiting fail with `Cancelled`.
    pub fn close(&self) {
        self.link.close();
    }

    /// Closes and waits for the socket to be released.
    pub async fn shutdown(self) {
        self.link.close();
        if let Err(err) = self.task.await {
            warn!("socket task ended badly: {err}");
        }
    }
}

impl Link {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn is_connected(&self) -> bool {
        self.state() != ConnectionState::Disconnected
    }

    fn is_flying(&self) -> bool {
        self.state() == ConnectionState::Flying
    }

    async fn request(&self, command: &Command) -> Result<String> {
        if !self.is_connected() {
            return Err(TelloError::NotConnected);
        }

        debug!("SEND {}", command.text());
        let (reply, rx) = oneshot::channel();
        self.outbound
            .send(Outbound::Request { text: command.text().to_string(), reply })
            .map_err(|_| TelloError::NotConnected)?;

        match timeout(command.timeout(), rx).await {
            Ok(Ok(reply)) => {
                if let Ok(response) = &reply {
                    debug!("RECEIVED {response} for {}", command.text());
                }
                reply
            }
            Ok(Err(_)) => Err(TelloError::Cancelled { command: command.text().to_string() }),
            Err(_) => Err(TelloError::Timeout { command: command.text().to_string(), after: command.timeout() }),
        }
    }

    async fn handle_failure(&self, err: &TelloError) {
        if !err.triggers_abort() {
            return;
        }

        let action = match &self.interceptor {
            Some(interceptor) => interceptor(err),
            None => ErrorAction::Abort,
        };

        match action {
            ErrorAction::Abort => {
                warn!("{err}, aborting");
                self.abort().await;
            }
            ErrorAction::Continue => debug!("{err}, continuing"),
        }
    }

    async fn abort(&self) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            debug!("already aborted");
            return;
        }

        warn!("ABORT");

        if self.is_flying() {
            // replies to timed out commands must not be taken for the land ack
            let _ = self.outbound.send(Outbound::DropExpired);

            let land = Command::new(TelloCommand::Land.to_string(), self.land_timeout);
            match self.request(&land).await {
                Ok(response) if response == "ok" => info!("landed"),
                Ok(response) => warn!("land refused during abort: {response}"),
                Err(err) => warn!("land failed during abort: {err}"),
            }
        }

        self.close();
    }

    fn close(&self) {
        if self.state.send_replace(ConnectionState::Disconnected) != ConnectionState::Disconnected {
            info!("CLOSE {}", self.local_addr);
        }
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Passes failures noticed by the socket task, rather than by a waiting
/// command, to the interceptor or the abort sequence. Ends with the channel.
async fn handle_faults(link: Weak<Link>, mut faults: mpsc::UnboundedReceiver<TelloError>) {
    while let Some(err) = faults.recv().await {
        match link.upgrade() {
            Some(link) => link.handle_failure(&err).await,
            None => break,
        }
    }
}

async fn run_socket(
    sock: UdpSocket,
    mut requests: mpsc::UnboundedReceiver<Outbound>,
    faults: mpsc::UnboundedSender<TelloError>,
    echo_check: bool,
) {
    let mut queue: ResponseQueue<ReplyPromise> = ResponseQueue::new(echo_check);
    let mut buf = vec![0; RESPONSE_BUFFER_SIZE];

    loop {
        tokio::select! {
            message = requests.recv() => match message {
                Some(Outbound::Request { text, reply }) => match sock.send(text.as_bytes()).await {
                    Ok(_) => queue.push(text, reply),
                    Err(err) => {
                        let _ = reply.send(Err(err.into()));
                    }
                },
                Some(Outbound::Notify { text, sent }) => {
                    let result = sock.send(text.as_bytes()).await.map(|_| ()).map_err(TelloError::from);
                    let _ = sent.send(result);
                }
                Some(Outbound::DropExpired) => {
                    let dropped = queue.retain(|reply| !reply.is_closed());
                    if dropped > 0 {
                        debug!("dropped {dropped} timed out command(s), {} still pending", queue.len());
                    }
                }
                Some(Outbound::Close) | None => break,
            },
            received = sock.recv(&mut buf) => match received {
                Ok(n) => match queue.dispatch(&buf[..n]) {
                    Dispatch::Resolved { slot, reply } => {
                        if slot.promise.send(reply).is_err() {
                            debug!("late reply to \"{}\" discarded", slot.command);
                        }
                    }
                    Dispatch::Unmatched { text } => {
                        warn!("reply \"{text}\" arrived with no command waiting");
                        let _ = faults.send(TelloError::ProtocolError {
                            msg: format!("unexpected reply \"{text}\", out of step with the drone"),
                        });
                    }
                },
                Err(err) => warn!("receive failed: {err}"),
            }
        }
    }

    // dropping the promises cancels whoever is still waiting
    let cancelled = queue.drain().count();
    debug!("socket closed, {cancelled} pending command(s) cancelled");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    async fn fake_drone() -> (UdpSocket, TelloConfig) {
        let drone = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = TelloConfig {
            drone_host: "127.0.0.1".to_string(),
            control_port: drone.local_addr().unwrap().port(),
            local_control_port: 0,
            response_timeout_ms: 2000,
            ..TelloConfig::default()
        };
        (drone, config)
    }

    async fn receive(drone: &UdpSocket) -> (String, SocketAddr) {
        let mut buf = [0; 256];
        let (n, from) = timeout(Duration::from_secs(2), drone.recv_from(&mut buf))
            .await
            .expect("drone heard nothing")
            .unwrap();
        (String::from_utf8(buf[..n].to_vec()).unwrap(), from)
    }

    async fn assert_silent(drone: &UdpSocket) {
        let mut buf = [0; 256];
        let heard = timeout(Duration::from_millis(200), drone.recv_from(&mut buf)).await;
        assert!(heard.is_err(), "drone should not have received anything more");
    }

    async fn wait_until_closed(channel: &CommandChannel) {
        let mut watcher = channel.watch_state();
        timeout(Duration::from_secs(2), async {
            while *watcher.borrow_and_update() != ConnectionState::Disconnected {
                watcher.changed().await.unwrap();
            }
        })
        .await
        .expect("channel stayed open");
    }

    fn quick(text: &str) -> Command {
        Command::new(text, Duration::from_millis(100))
    }

    fn slow(text: &str) -> Command {
        Command::new(text, Duration::from_secs(2))
    }

    fn recording_interceptor(seen: Arc<Mutex<Vec<String>>>) -> ErrorInterceptor {
        Box::new(move |err| {
            seen.lock().unwrap().push(err.to_string());
            ErrorAction::Continue
        })
    }

    #[tokio::test]
    async fn ok_reply_succeeds() {
        let (drone, config) = fake_drone().await;
        let channel = CommandChannel::open(&config).await.unwrap();

        let takeoff = slow("takeoff");
        let (result, _) = tokio::join!(channel.send(&takeoff), async {
            let (command, from) = receive(&drone).await;
            assert_eq!(command, "takeoff");
            drone.send_to(b"ok", from).await.unwrap();
        });

        result.unwrap();
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn concurrent_sends_resolve_in_send_order() {
        let (drone, config) = fake_drone().await;
        let channel = CommandChannel::open(&config).await.unwrap();

        let answer = async {
            let mut from = None;
            for expected in ["battery?", "speed?", "time?"] {
                let (command, f) = receive(&drone).await;
                assert_eq!(command, expected);
                from = Some(f);
            }
            let from = from.unwrap();
            for reply in ["87", "100.0", "12s"] {
                drone.send_to(reply.as_bytes(), from).await.unwrap();
            }
        };

        let (battery, speed, time) = (slow("battery?"), slow("speed?"), slow("time?"));
        let (battery, speed, time, _) = tokio::join!(
            channel.send_expect(&battery, |r| r.parse::<u8>().ok()),
            channel.send_expect(&speed, |r| r.parse::<f32>().ok()),
            channel.send_expect(&time, |r| Some(r.to_string())),
            answer
        );

        assert_eq!(battery.unwrap(), 87);
        assert_eq!(speed.unwrap(), 100.0);
        assert_eq!(time.unwrap(), "12s");
    }

    #[tokio::test]
    async fn rejection_aborts_without_landing_when_grounded() {
        let (drone, config) = fake_drone().await;
        let channel = CommandChannel::open(&config).await.unwrap();

        let flip = slow("flip l");
        let (result, _) = tokio::join!(channel.send(&flip), async {
            let (_, from) = receive(&drone).await;
            drone.send_to(b"error No valid imu", from).await.unwrap();
        });

        match result.unwrap_err() {
            TelloError::DroneRejected { command, response } => {
                assert_eq!(command, "flip l");
                assert_eq!(response, "error No valid imu");
            }
            other => panic!("expected a rejection, got {other:?}"),
        }
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert_silent(&drone).await;
    }

    #[tokio::test]
    async fn timeout_while_flying_lands_once_then_closes() {
        let (drone, config) = fake_drone().await;
        let channel = CommandChannel::open(&config).await.unwrap();
        channel.set_state(ConnectionState::Flying);

        let forward = quick("forward 500");
        let (result, _) = tokio::join!(channel.send(&forward), async {
            let (command, _) = receive(&drone).await;
            assert_eq!(command, "forward 500");

            let (command, from) = receive(&drone).await;
            assert_eq!(command, "land");
            drone.send_to(b"ok", from).await.unwrap();

            assert_silent(&drone).await;
        });

        assert!(matches!(result, Err(TelloError::Timeout { .. })));
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn abort_twice_lands_once() {
        let (drone, config) = fake_drone().await;
        let channel = CommandChannel::open(&config).await.unwrap();
        channel.set_state(ConnectionState::Flying);

        let (_, _) = tokio::join!(
            async {
                channel.abort().await;
                channel.abort().await;
            },
            async {
                let (command, from) = receive(&drone).await;
                assert_eq!(command, "land");
                drone.send_to(b"ok", from).await.unwrap();
            }
        );

        assert_silent(&drone).await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn interceptor_can_keep_the_connection() {
        let (drone, config) = fake_drone().await;

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let interceptor: ErrorInterceptor = Box::new(move |err| {
            assert!(matches!(err, TelloError::Timeout { .. }));
            counter.fetch_add(1, Ordering::SeqCst);
            ErrorAction::Continue
        });
        let channel = CommandChannel::open_with(&config, Some(interceptor)).await.unwrap();

        let up = quick("up 20");
        let (first, _) = tokio::join!(channel.send(&up), async {
            receive(&drone).await;
        });
        assert!(matches!(first, Err(TelloError::Timeout { .. })));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(channel.is_connected());

        // the late "ok" for "up 20" must not be taken as the answer to "cw 90"
        let cw = slow("cw 90");
        let (second, _) = tokio::join!(channel.send_expect(&cw, |r| Some(r.to_string())), async {
            let (command, from) = receive(&drone).await;
            assert_eq!(command, "cw 90");
            drone.send_to(b"ok", from).await.unwrap();
            drone.send_to(b"ok cw", from).await.unwrap();
        });
        assert_eq!(second.unwrap(), "ok cw");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_channel_sends_nothing() {
        let (drone, config) = fake_drone().await;
        let channel = CommandChannel::open(&config).await.unwrap();
        channel.close();

        let err = channel.send(&slow("takeoff")).await.unwrap_err();
        assert!(matches!(err, TelloError::NotConnected));
        assert_silent(&drone).await;
    }

    #[tokio::test]
    async fn close_cancels_waiting_commands() {
        let (drone, config) = fake_drone().await;
        let channel = CommandChannel::open(&config).await.unwrap();

        let land = slow("land");
        let (result, _) = tokio::join!(channel.send(&land), async {
            receive(&drone).await;
            channel.close();
        });

        assert!(matches!(result, Err(TelloError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn remote_control_leaves_no_pending_reply() {
        let (drone, config) = fake_drone().await;
        let channel = CommandChannel::open(&config).await.unwrap();

        channel.send_without_reply(&slow("rc 0 10 0 0")).await.unwrap();
        let (command, _) = receive(&drone).await;
        assert_eq!(command, "rc 0 10 0 0");

        let stop = slow("stop");
        let (result, _) = tokio::join!(channel.send(&stop), async {
            let (command, from) = receive(&drone).await;
            assert_eq!(command, "stop");
            drone.send_to(b"ok", from).await.unwrap();
        });
        result.unwrap();
    }

    #[tokio::test]
    async fn stray_reply_aborts_by_default() {
        let (drone, config) = fake_drone().await;
        let channel = CommandChannel::open(&config).await.unwrap();
        channel.set_state(ConnectionState::Flying);

        let target = SocketAddr::from(([127, 0, 0, 1], channel.local_addr().port()));
        drone.send_to(b"ok", target).await.unwrap();

        let (command, from) = receive(&drone).await;
        assert_eq!(command, "land");
        drone.send_to(b"ok", from).await.unwrap();

        wait_until_closed(&channel).await;
        assert_silent(&drone).await;
    }

    #[tokio::test]
    async fn stray_reply_goes_to_the_interceptor() {
        let (drone, config) = fake_drone().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let channel = CommandChannel::open_with(&config, Some(recording_interceptor(seen.clone())))
            .await
            .unwrap();

        let target = SocketAddr::from(([127, 0, 0, 1], channel.local_addr().port()));
        drone.send_to(b"ok", target).await.unwrap();

        timeout(Duration::from_secs(2), async {
            while seen.lock().unwrap().is_empty() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("interceptor never called");

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(seen.lock().unwrap()[0].starts_with("protocol error"));
        assert_eq!(channel.state(), ConnectionState::Connected);

        let command = slow("command");
        let (result, _) = tokio::join!(channel.send(&command), async {
            let (_, from) = receive(&drone).await;
            drone.send_to(b"ok", from).await.unwrap();
        });
        result.unwrap();
    }

    #[tokio::test]
    async fn mismatched_echo_aborts() {
        let (drone, mut config) = fake_drone().await;
        config.echo_check = true;
        let channel = CommandChannel::open(&config).await.unwrap();
        channel.set_state(ConnectionState::Flying);

        let cw = slow("cw 90");
        let (result, _) = tokio::join!(channel.send(&cw), async {
            let (command, from) = receive(&drone).await;
            assert_eq!(command, "cw 90");
            drone.send_to(b"ccw 90 ok", from).await.unwrap();

            let (command, from) = receive(&drone).await;
            assert_eq!(command, "land");
            drone.send_to(b"land ok", from).await.unwrap();

            assert_silent(&drone).await;
        });

        assert!(matches!(result, Err(TelloError::ProtocolError { .. })));
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn matching_echo_is_stripped() {
        let (drone, mut config) = fake_drone().await;
        config.echo_check = true;
        let channel = CommandChannel::open(&config).await.unwrap();

        let battery = slow("battery?");
        let (result, _) = tokio::join!(channel.send_expect(&battery, |r| r.parse::<u8>().ok()), async {
            let (_, from) = receive(&drone).await;
            drone.send_to(b"battery? 64", from).await.unwrap();
        });

        assert_eq!(result.unwrap(), 64);
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn closed_channel_stays_disconnected() {
        let (_drone, config) = fake_drone().await;
        let channel = CommandChannel::open(&config).await.unwrap();
        let mut watcher = channel.watch_state();

        channel.set_state(ConnectionState::Flying);
        watcher.changed().await.unwrap();
        assert_eq!(*watcher.borrow_and_update(), ConnectionState::Flying);

        channel.close();
        channel.set_state(ConnectionState::Flying);
        assert_eq!(*watcher.borrow(), ConnectionState::Disconnected);

        channel.shutdown().await;
    }
}
