use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::TelloConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Back,
}

impl Direction {
    fn keyword(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Forward => "forward",
            Direction::Back => "back",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipDirection {
    Left,
    Right,
    Forward,
    Back,
}

impl FlipDirection {
    fn keyword(&self) -> &'static str {
        match self {
            FlipDirection::Left => "l",
            FlipDirection::Right => "r",
            FlipDirection::Forward => "f",
            FlipDirection::Back => "b",
        }
    }
}

/// A position in cm relative to the drone, or to a mission pad when one is
/// given with the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl Position {
    pub fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.x, self.y, self.z)
    }
}

/// One of the eight numbered mission pads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissionPad(u8);

impl MissionPad {
    pub fn new(id: u8) -> Option<Self> {
        (1..=8).contains(&id).then_some(Self(id))
    }

    pub fn id(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for MissionPad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Which camera(s) look for mission pads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionPadDetection {
    Down = 0,
    Forward = 1,
    Both = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameRate {
    Low,
    Middle,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoResolution {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoBitrate {
    Auto = 0,
    Mbps1 = 1,
    Mbps2 = 2,
    Mbps3 = 3,
    Mbps4 = 4,
    Mbps5 = 5,
}

/// Reported by `hardware?`: a plain Tello or one with the open source
/// controller (RoboMaster TT) attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerHardware {
    Tello,
    OpenSource,
}

impl ControllerHardware {
    pub fn from_response(s: &str) -> Option<Self> {
        match s {
            "TELLO" => Some(ControllerHardware::Tello),
            "RMTT" => Some(ControllerHardware::OpenSource),
            _ => None,
        }
    }
}

/// Everything the drone's text SDK understands.
#[derive(Debug, Clone, PartialEq)]
pub enum TelloCommand {
    EnterSdkMode,
    TakeOff,
    Land,
    StopAndHover,
    EmergencyStop,
    RemoteControl { left_right: i8, forwards_backwards: i8, up_down: i8, yaw: i8 },
    Move { direction: Direction, distance: u16 },
    TurnClockwise(u16),
    TurnCounterClockwise(u16),
    Flip(FlipDirection),
    GoTo { position: Position, speed: u16, mission_pad: Option<MissionPad> },
    CurveTo { via: Position, position: Position, speed: u16, mission_pad: Option<MissionPad> },
    Jump { position: Position, speed: u16, yaw: i16, from: MissionPad, to: MissionPad },
    SetSpeed(u16),
    StartVideo,
    StopVideo,
    EnableMissionPads,
    DisableMissionPads,
    SetMissionPadDetection(MissionPadDetection),
    SetVideoFrameRate(VideoFrameRate),
    SetVideoBitrate(VideoBitrate),
    SetVideoResolution(VideoResolution),
    SetDownVision(bool),
    SetWiFi { ssid: String, password: String },
    JoinAccessPoint { ssid: String, password: String },
    QuerySpeed,
    QueryBattery,
    QueryFlightTime,
    QueryWiFiSignal,
    QuerySdkVersion,
    QuerySerialNumber,
    QueryHardware,
}

impl TelloCommand {
    /// `rc` is the only command the drone never acknowledges.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, TelloCommand::RemoteControl { .. })
    }

    /// Queries answer with a value rather than "ok".
    pub fn is_query(&self) -> bool {
        use TelloCommand::*;
        matches!(
            self,
            QuerySpeed
                | QueryBattery
                | QueryFlightTime
                | QueryWiFiSignal
                | QuerySdkVersion
                | QuerySerialNumber
                | QueryHardware
        )
    }

    /// Positional and curved flights get the long response bound.
    pub fn is_long_running(&self) -> bool {
        matches!(self, TelloCommand::GoTo { .. } | TelloCommand::CurveTo { .. } | TelloCommand::Jump { .. })
    }

    pub fn timeout(&self, config: &TelloConfig) -> Duration {
        if self.is_long_running() {
            config.long_response_timeout()
        } else {
            config.response_timeout()
        }
    }
}

impl fmt::Display for TelloCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TelloCommand::*;

        match self {
            EnterSdkMode => write!(f, "command"),
            TakeOff => write!(f, "takeoff"),
            Land => write!(f, "land"),
            StopAndHover => write!(f, "stop"),
            EmergencyStop => write!(f, "emergency"),
            RemoteControl { left_right, forwards_backwards, up_down, yaw } => {
                write!(f, "rc {left_right} {forwards_backwards} {up_down} {yaw}")
            }
            Move { direction, distance } => write!(f, "{} {distance}", direction.keyword()),
            TurnClockwise(degrees) => write!(f, "cw {degrees}"),
            TurnCounterClockwise(degrees) => write!(f, "ccw {degrees}"),
            Flip(direction) => write!(f, "flip {}", direction.keyword()),
            GoTo { position, speed, mission_pad } => {
                write!(f, "go {position} {speed}")?;
                if let Some(pad) = mission_pad {
                    write!(f, " {pad}")?;
                }
                Ok(())
            }
            CurveTo { via, position, speed, mission_pad } => {
                write!(f, "curve {via} {position} {speed}")?;
                if let Some(pad) = mission_pad {
                    write!(f, " {pad}")?;
                }
                Ok(())
            }
            Jump { position, speed, yaw, from, to } => write!(f, "jump {position} {speed} {yaw} {from} {to}"),
            SetSpeed(speed) => write!(f, "speed {speed}"),
            StartVideo => write!(f, "streamon"),
            StopVideo => write!(f, "streamoff"),
            EnableMissionPads => write!(f, "mon"),
            DisableMissionPads => write!(f, "moff"),
            SetMissionPadDetection(detection) => write!(f, "mdirection {}", *detection as u8),
            SetVideoFrameRate(rate) => {
                let rate = match rate {
                    VideoFrameRate::Low => "low",
                    VideoFrameRate::Middle => "middle",
                    VideoFrameRate::High => "high",
                };
                write!(f, "setfps {rate}")
            }
            SetVideoBitrate(bitrate) => write!(f, "setbitrate {}", *bitrate as u8),
            SetVideoResolution(resolution) => {
                let resolution = match resolution {
                    VideoResolution::Low => "low",
                    VideoResolution::High => "high",
                };
                write!(f, "setresolution {resolution}")
            }
            SetDownVision(on) => write!(f, "downvision {}", u8::from(*on)),
            SetWiFi { ssid, password } => write!(f, "wifi {ssid} {password}"),
            JoinAccessPoint { ssid, password } => write!(f, "ap {ssid} {password}"),
            QuerySpeed => write!(f, "speed?"),
            QueryBattery => write!(f, "battery?"),
            QueryFlightTime => write!(f, "time?"),
            QueryWiFiSignal => write!(f, "wifi?"),
            QuerySdkVersion => write!(f, "sdk?"),
            QuerySerialNumber => write!(f, "sn?"),
            QueryHardware => write!(f, "hardware?"),
        }
    }
}

/// A command line ready to go out, with the time allowed for its reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    text: String,
    timeout: Duration,
}

impl Command {
    pub fn new(text: impl Into<String>, timeout: Duration) -> Self {
        Self { text: text.into(), timeout }
    }

    pub fn from_tello(command: &TelloCommand, config: &TelloConfig) -> Self {
        Self::new(command.to_string(), command.timeout(config))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

pub type TelloCommandSender = mpsc::UnboundedSender<TelloCommand>;
pub type TelloCommandReceiver = mpsc::UnboundedReceiver<TelloCommand>;

pub fn make_tello_command_channel() -> (TelloCommandSender, TelloCommandReceiver) {
    mpsc::unbounded_channel()
}
