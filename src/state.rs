use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::{spawn, task};
use tracing::{debug, info, warn};

use crate::command::MissionPad;
use crate::errors::Result;

const STATE_BUFFER_SIZE: usize = 1024;

pub type TelloStateSender = mpsc::UnboundedSender<TelloState>;
pub type TelloStateReceiver = mpsc::UnboundedReceiver<TelloState>;

pub fn make_tello_state_channel() -> (TelloStateSender, TelloStateReceiver) {
    mpsc::unbounded_channel()
}

/// Where each decoded state message goes.
pub type StateSink = Box<dyn FnMut(TelloState) + Send>;

/// The live state of the drone, as of one broadcast.
///
/// Each field is `None` when the message didn't carry it or carried
/// something unreadable. Nothing is carried over from earlier messages.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelloState {
    /// The message as received.
    pub raw: String,
    /// Degrees around the drone's local y axis.
    pub roll: Option<i16>,
    /// Degrees around the drone's local x axis.
    pub pitch: Option<i16>,
    /// Degrees around the drone's local z axis.
    pub yaw: Option<i16>,
    /// cm.
    pub height: Option<i16>,
    pub barometer: Option<f32>,
    /// Percent remaining.
    pub battery: Option<u8>,
    /// Distance reading from the downward sensor, cm.
    pub time_of_flight: Option<i16>,
    /// Seconds the motors have been running.
    pub motor_time: Option<u16>,
    /// Degrees Celsius.
    pub temperature: Option<Range<i16>>,
    /// cm/s².
    pub acceleration: Option<Vector3<f32>>,
    /// cm/s.
    pub velocity: Option<Vector3<f32>>,
    /// Detected mission pad, `-1` when none is in view.
    pub mission_pad: Option<i8>,
    pub mission_pad_position: Option<Vector3<f32>>,
    /// Pitch, roll and yaw relative to the detected mission pad.
    pub mission_pad_attitude: Option<Vector3<i16>>,
    values: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Range<T> {
    pub low: T,
    pub high: T,
}

impl TelloState {
    /// Parses a state string received from the drone.
    ///
    /// Example message:
    /// "mid:-1;x:-100;y:-100;z:-100;mpry:-1,-1,-1;pitch:0;roll:0;yaw:-3;vgx:0;vgy:0;vgz:1;templ:58;temph:60;tof:71;h:50;bat:82;baro:-57.14;time:14;agx:17.00;agy:-4.00;agz:-956.00;"
    ///
    pub fn from_message(s: &str) -> TelloState {
        let values: HashMap<String, String> = s
            .trim()
            .split(';')
            .filter(|f| !f.is_empty())
            .filter_map(split_key_value)
            .collect();

        let value = |k: &str| values.get(k).map(String::as_str);

        TelloState {
            raw: s.to_string(),
            roll: value_as(value("roll")),
            pitch: value_as(value("pitch")),
            yaw: value_as(value("yaw")),
            height: value_as(value("h")),
            barometer: value_as(value("baro")),
            battery: value_as(value("bat")),
            time_of_flight: value_as(value("tof")),
            motor_time: value_as(value("time")),
            temperature: range_of(value("templ"), value("temph")),
            acceleration: vector_of(value("agx"), value("agy"), value("agz")),
            velocity: vector_of(value("vgx"), value("vgy"), value("vgz")),
            mission_pad: value_as(value("mid")),
            mission_pad_position: vector_of(value("x"), value("y"), value("z")),
            mission_pad_attitude: value("mpry").and_then(triple_of),
            values,
        }
    }

    /// The mission pad in view, if any.
    pub fn detected_mission_pad(&self) -> Option<MissionPad> {
        self.mission_pad
            .and_then(|id| u8::try_from(id).ok())
            .and_then(MissionPad::new)
    }

    /// Raw text of any field by its message key, including ones without a
    /// typed accessor.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

fn split_key_value(kv: &str) -> Option<(String, String)> {
    let (k, v) = kv.split_once(':')?;
    Some((k.trim().to_string(), v.trim().to_string()))
}

fn value_as<T: FromStr>(s: Option<&str>) -> Option<T> {
    s?.parse::<T>().ok()
}

fn vector_of(x: Option<&str>, y: Option<&str>, z: Option<&str>) -> Option<Vector3<f32>> {
    Some(Vector3 { x: value_as(x)?, y: value_as(y)?, z: value_as(z)? })
}

fn range_of(low: Option<&str>, high: Option<&str>) -> Option<Range<i16>> {
    Some(Range { low: value_as(low)?, high: value_as(high)? })
}

fn triple_of(s: &str) -> Option<Vector3<i16>> {
    let mut i = s.split(',');
    let v = Vector3 {
        x: value_as(i.next())?,
        y: value_as(i.next())?,
        z: value_as(i.next())?,
    };
    i.next().is_none().then_some(v)
}

/// Receives the drone's state broadcasts and hands each one, decoded, to a
/// sink.
///
/// *nb* As messages are sent to the UDP broadcast address 0.0.0.0 this
/// only works in AP mode, ie using the drone's own WiFi network
#[derive(Debug)]
pub struct StateListener {
    task: task::JoinHandle<()>,
    local_addr: SocketAddr,
}

impl StateListener {
    pub async fn start_listening(port: u16, mut sink: StateSink) -> Result<Self> {
        let local_address = format!("0.0.0.0:{port}");
        info!("START LISTENING at {local_address}");

        let sock = UdpSocket::bind(&local_address).await?;
        let local_addr = sock.local_addr()?;

        let task = spawn(async move {
            let mut buf = vec![0; STATE_BUFFER_SIZE];
            loop {
                let n = match sock.recv(&mut buf).await {
                    Ok(n) => n,
                    Err(err) => {
                        warn!("receive failed: {err}");
                        continue;
                    }
                };

                match std::str::from_utf8(&buf[..n]) {
                    Ok(message) if message.is_ascii() => sink(TelloState::from_message(message.trim())),
                    _ => debug!("dropped undecodable state message ({n} bytes)"),
                }
            }
        });

        Ok(Self { task, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stop_listening(mut self) {
        info!("STOP LISTENING at {}", self.local_addr);
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for StateListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}
