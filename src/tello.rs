use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{CommandChannel, ConnectionState};
use crate::command::*;
use crate::config::TelloConfig;
use crate::errors::{Result, TelloError};
use crate::feed::{Feed, Subscription};
use crate::options::TelloOptions;
use crate::state::{StateListener, TelloState};
use crate::video::{TelloVideoFrame, VideoListener};
use crate::wifi::wait_for_wifi;

// states
#[derive(Debug)]
pub struct NoWifi;

#[derive(Debug)]
pub struct Disconnected;

#[derive(Debug)]
pub struct Connected {
    config: TelloConfig,
    channel: CommandChannel,
    state_listener: StateListener,
    video_listener: Option<VideoListener>,
    drone_state: Feed<TelloState>,
    video: Feed<TelloVideoFrame>,
    command_receiver: Mutex<Option<TelloCommandReceiver>>,
}

#[derive(Debug)]
pub struct Tello<S = NoWifi> {
    state: S,
}

impl Tello<NoWifi> {
    pub fn new() -> Self {
        Self { state: NoWifi }
    }

    /// Waits, however long it takes, to join the drone's own network.
    pub async fn wait_for_wifi(&self) -> Result<Tello<Disconnected>> {
        self.wait_for_wifi_with(&TelloConfig::default(), None).await
    }

    /// Waits to join a network named with `config.wifi_ssid_prefix`, giving
    /// up after `attempts` checks if given.
    pub async fn wait_for_wifi_with(&self, config: &TelloConfig, attempts: Option<u32>) -> Result<Tello<Disconnected>> {
        info!("waiting for WiFi...");
        wait_for_wifi(&config.wifi_ssid_prefix, config.wifi_poll_interval(), attempts).await?;
        Ok(Tello { state: Disconnected })
    }

    /// Skips the WiFi check, eg when the drone has joined another network
    /// as a station.
    pub fn assume_wifi(self) -> Tello<Disconnected> {
        Tello { state: Disconnected }
    }
}

impl Default for Tello<NoWifi> {
    fn default() -> Self {
        Self::new()
    }
}

impl Tello<Disconnected> {
    pub async fn connect(&self) -> Result<Tello<Connected>> {
        self.connect_with(TelloOptions::default()).await
    }

    pub async fn connect_with(&self, options: TelloOptions) -> Result<Tello<Connected>> {
        let TelloOptions { config, state_sender, video_sender, video, command_receiver, interceptor } = options;

        info!("CONNECT {}", config.drone_address());

        let channel = CommandChannel::open_with(&config, interceptor).await?;

        let drone_state = Feed::new();
        let state_listener =
            StateListener::start_listening(config.state_port, sink(drone_state.clone(), state_sender)).await?;

        let video_feed = Feed::new();
        let video_listener = if video {
            Some(VideoListener::start_listening(config.video_port, sink(video_feed.clone(), video_sender)).await?)
        } else {
            None
        };

        let drone = Tello {
            state: Connected {
                config,
                channel,
                state_listener,
                video_listener,
                drone_state,
                video: video_feed,
                command_receiver: Mutex::new(command_receiver),
            },
        };

        info!("putting drone in command mode...");
        drone.execute(TelloCommand::EnterSdkMode).await?;

        if drone.state.config.check_battery_on_connect {
            let battery = drone.query_battery().await?;
            if battery < drone.state.config.low_battery_threshold {
                warn!("battery low ({battery}%)");
            } else {
                info!("battery {battery}%");
            }
        }

        info!("CONNECTED");

        Ok(drone)
    }
}

/// Fans one listener's output out to the latest-value feed and, if asked
/// for, a channel.
fn sink<T>(feed: Feed<T>, sender: Option<mpsc::UnboundedSender<T>>) -> Box<dyn FnMut(T) + Send>
where
    T: Clone + Send + Sync + 'static,
{
    Box::new(move |value: T| {
        feed.publish(value.clone());
        if let Some(tx) = &sender {
            let _ = tx.send(value);
        }
    })
}

fn parse_text(response: &str) -> Option<String> {
    (!response.is_empty() && !response.starts_with("error")).then(|| response.to_string())
}

impl Tello<Connected> {
    /// Sends any command text and returns whatever the drone replies.
    pub async fn send(&self, msg: &str) -> Result<String> {
        let command = Command::new(msg, self.state.config.response_timeout());
        self.state.channel.send_expect(&command, |r| Some(r.to_string())).await
    }

    /// Sends a command, tracking takeoff and landing.
    pub async fn execute(&self, command: TelloCommand) -> Result<()> {
        let c = Command::from_tello(&command, &self.state.config);
        let channel = &self.state.channel;

        if !command.expects_reply() {
            return channel.send_without_reply(&c).await;
        }

        if command.is_query() {
            let response = channel.send_expect(&c, parse_text).await?;
            info!("{command}: {response}");
            return Ok(());
        }

        channel.send(&c).await?;

        match command {
            TelloCommand::TakeOff => channel.set_state(ConnectionState::Flying),
            TelloCommand::Land | TelloCommand::EmergencyStop => channel.set_state(ConnectionState::Connected),
            _ => {}
        }

        Ok(())
    }

    async fn query<T>(&self, command: TelloCommand, parse: impl FnOnce(&str) -> Option<T>) -> Result<T> {
        let c = Command::from_tello(&command, &self.state.config);
        self.state.channel.send_expect(&c, parse).await
    }

    /// Runs commands from the `TelloOptions::with_command` channel until
    /// every sender is gone or the connection closes.
    pub async fn handle_commands(&self) -> Result<()> {
        let receiver = self
            .state
            .command_receiver
            .lock()
            .map_err(|_| TelloError::Generic { msg: "command receiver poisoned".to_string() })?
            .take();

        let mut receiver = receiver.ok_or_else(|| TelloError::Generic {
            msg: "no command channel, use TelloOptions::with_command".to_string(),
        })?;

        while let Some(command) = receiver.recv().await {
            debug!("handling {command:?}");
            match self.execute(command).await {
                Ok(()) => {}
                Err(err @ (TelloError::NotConnected | TelloError::Cancelled { .. })) => return Err(err),
                Err(err) => warn!("command failed: {err}"),
            }
        }

        Ok(())
    }

    pub async fn disconnect(self) -> Tello<Disconnected> {
        let Connected { channel, state_listener, video_listener, .. } = self.state;

        info!("DISCONNECT");
        channel.shutdown().await;
        state_listener.stop_listening().await;
        if let Some(video_listener) = video_listener {
            video_listener.stop_listening().await;
        }

        Tello { state: Disconnected }
    }

    /// Lands if flying and closes the connection. Only the first abort on a
    /// connection does anything.
    pub async fn abort(&self) {
        self.state.channel.abort().await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.channel.state()
    }

    pub fn flying(&self) -> bool {
        self.state.channel.is_flying()
    }

    /// The most recent state broadcast, if any has arrived.
    pub fn state(&self) -> Option<Arc<TelloState>> {
        self.state.drone_state.latest()
    }

    /// Waits on state broadcasts arriving from now on.
    pub fn state_stream(&self) -> Subscription<TelloState> {
        self.state.drone_state.subscribe()
    }

    /// Where state broadcasts are being received.
    pub fn state_address(&self) -> SocketAddr {
        self.state.state_listener.local_addr()
    }

    /// The most recent video frame, if video was requested and a frame has
    /// arrived.
    pub fn video_frame(&self) -> Option<Arc<TelloVideoFrame>> {
        self.state.video.latest()
    }

    pub fn video_stream(&self) -> Subscription<TelloVideoFrame> {
        self.state.video.subscribe()
    }

    pub fn video_address(&self) -> Option<SocketAddr> {
        self.state.video_listener.as_ref().map(VideoListener::local_addr)
    }

    pub fn video_url(&self) -> String {
        format!("udp://0.0.0.0:{}", self.state.config.video_port)
    }

    pub async fn take_off(&self) -> Result<()> {
        self.execute(TelloCommand::TakeOff).await
    }

    pub async fn land(&self) -> Result<()> {
        self.execute(TelloCommand::Land).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.execute(TelloCommand::StopAndHover).await
    }

    /// Stops the motors at once, wherever the drone is.
    pub async fn emergency_stop(&self) -> Result<()> {
        self.execute(TelloCommand::EmergencyStop).await
    }

    pub async fn move_in(&self, direction: Direction, distance: u16) -> Result<()> {
        self.execute(TelloCommand::Move { direction, distance }).await
    }

    pub async fn move_up(&self, distance: u16) -> Result<()> {
        self.move_in(Direction::Up, distance).await
    }

    pub async fn move_down(&self, distance: u16) -> Result<()> {
        self.move_in(Direction::Down, distance).await
    }

    pub async fn move_left(&self, distance: u16) -> Result<()> {
        self.move_in(Direction::Left, distance).await
    }

    pub async fn move_right(&self, distance: u16) -> Result<()> {
        self.move_in(Direction::Right, distance).await
    }

    pub async fn move_forward(&self, distance: u16) -> Result<()> {
        self.move_in(Direction::Forward, distance).await
    }

    pub async fn move_back(&self, distance: u16) -> Result<()> {
        self.move_in(Direction::Back, distance).await
    }

    pub async fn turn_clockwise(&self, degrees: u16) -> Result<()> {
        self.execute(TelloCommand::TurnClockwise(degrees)).await
    }

    pub async fn turn_counterclockwise(&self, degrees: u16) -> Result<()> {
        self.execute(TelloCommand::TurnCounterClockwise(degrees)).await
    }

    pub async fn flip(&self, direction: FlipDirection) -> Result<()> {
        self.execute(TelloCommand::Flip(direction)).await
    }

    pub async fn flip_left(&self) -> Result<()> {
        self.flip(FlipDirection::Left).await
    }

    pub async fn flip_right(&self) -> Result<()> {
        self.flip(FlipDirection::Right).await
    }

    pub async fn flip_forward(&self) -> Result<()> {
        self.flip(FlipDirection::Forward).await
    }

    pub async fn flip_back(&self) -> Result<()> {
        self.flip(FlipDirection::Back).await
    }

    /// Flies in a straight line to `position`, relative to where the drone is.
    pub async fn go_to(&self, position: Position, speed: u16) -> Result<()> {
        self.execute(TelloCommand::GoTo { position, speed, mission_pad: None }).await
    }

    /// Flies to `position` relative to a mission pad, which must be in view.
    pub async fn go_to_mission_pad(&self, position: Position, speed: u16, mission_pad: MissionPad) -> Result<()> {
        self.execute(TelloCommand::GoTo { position, speed, mission_pad: Some(mission_pad) }).await
    }

    /// Flies a curve through `via` to `position`, both relative to where the
    /// drone is.
    pub async fn curve_to(&self, via: Position, position: Position, speed: u16) -> Result<()> {
        self.execute(TelloCommand::CurveTo { via, position, speed, mission_pad: None }).await
    }

    pub async fn curve_to_mission_pad(
        &self,
        via: Position,
        position: Position,
        speed: u16,
        mission_pad: MissionPad,
    ) -> Result<()> {
        self.execute(TelloCommand::CurveTo { via, position, speed, mission_pad: Some(mission_pad) }).await
    }

    /// Flies to `position` over pad `from`, finds pad `to` there and turns to
    /// `yaw` relative to it.
    pub async fn jump(&self, position: Position, speed: u16, yaw: i16, from: MissionPad, to: MissionPad) -> Result<()> {
        self.execute(TelloCommand::Jump { position, speed, yaw, from, to }).await
    }

    /// Speed in cm/s for subsequent moves.
    pub async fn set_speed(&self, speed: u16) -> Result<()> {
        self.execute(TelloCommand::SetSpeed(speed)).await
    }

    /// Joystick-style control, each axis -100 to 100. Not acknowledged by
    /// the drone.
    pub async fn remote_control(&self, left_right: i8, forwards_backwards: i8, up_down: i8, yaw: i8) -> Result<()> {
        self.execute(TelloCommand::RemoteControl { left_right, forwards_backwards, up_down, yaw }).await
    }

    pub async fn start_video(&self) -> Result<()> {
        self.execute(TelloCommand::StartVideo).await
    }

    pub async fn stop_video(&self) -> Result<()> {
        self.execute(TelloCommand::StopVideo).await
    }

    pub async fn set_video_frame_rate(&self, rate: VideoFrameRate) -> Result<()> {
        self.execute(TelloCommand::SetVideoFrameRate(rate)).await
    }

    pub async fn set_video_bitrate(&self, bitrate: VideoBitrate) -> Result<()> {
        self.execute(TelloCommand::SetVideoBitrate(bitrate)).await
    }

    pub async fn set_video_resolution(&self, resolution: VideoResolution) -> Result<()> {
        self.execute(TelloCommand::SetVideoResolution(resolution)).await
    }

    /// Switches the video stream to the downward camera.
    pub async fn set_down_vision(&self, on: bool) -> Result<()> {
        self.execute(TelloCommand::SetDownVision(on)).await
    }

    pub async fn enable_mission_pads(&self) -> Result<()> {
        self.execute(TelloCommand::EnableMissionPads).await
    }

    pub async fn disable_mission_pads(&self) -> Result<()> {
        self.execute(TelloCommand::DisableMissionPads).await
    }

    pub async fn set_mission_pad_detection(&self, detection: MissionPadDetection) -> Result<()> {
        self.execute(TelloCommand::SetMissionPadDetection(detection)).await
    }

    /// Renames the drone's own access point. Takes effect after a restart.
    pub async fn set_wifi(&self, ssid: &str, password: &str) -> Result<()> {
        self.execute(TelloCommand::SetWiFi { ssid: ssid.to_string(), password: password.to_string() }).await
    }

    /// Has the drone join another network as a station. Takes effect after a
    /// restart.
    pub async fn join_access_point(&self, ssid: &str, password: &str) -> Result<()> {
        self.execute(TelloCommand::JoinAccessPoint { ssid: ssid.to_string(), password: password.to_string() }).await
    }

    /// cm/s
    pub async fn query_speed(&self) -> Result<f32> {
        self.query(TelloCommand::QuerySpeed, |r| r.parse().ok()).await
    }

    /// Percent.
    pub async fn query_battery(&self) -> Result<u8> {
        self.query(TelloCommand::QueryBattery, |r| r.parse().ok()).await
    }

    /// Seconds of flight so far.
    pub async fn query_flight_time(&self) -> Result<u16> {
        self.query(TelloCommand::QueryFlightTime, |r| r.trim_end_matches('s').parse().ok()).await
    }

    /// Signal to noise ratio.
    pub async fn query_wifi_signal(&self) -> Result<u8> {
        self.query(TelloCommand::QueryWiFiSignal, |r| r.parse().ok()).await
    }

    pub async fn query_sdk_version(&self) -> Result<String> {
        self.query(TelloCommand::QuerySdkVersion, parse_text).await
    }

    pub async fn query_serial_number(&self) -> Result<String> {
        self.query(TelloCommand::QuerySerialNumber, parse_text).await
    }

    pub async fn query_hardware(&self) -> Result<ControllerHardware> {
        self.query(TelloCommand::QueryHardware, ControllerHardware::from_response).await
    }
}
