//! Async control of the Tello EDU drone over its UDP text SDK.
//!
//! Commands go out on the control port and are matched to the drone's
//! replies in order; state broadcasts and video chunks are received on their
//! own ports and offered as latest values, subscriptions or channels.
//!
//! ```no_run
//! use tello_link::{Tello, Result};
//!
//! # async fn fly() -> Result<()> {
//! let drone = Tello::new()
//!     .wait_for_wifi().await?;
//!
//! let drone = drone.connect().await?;
//!
//! drone.take_off().await?;
//! drone.turn_clockwise(360).await?;
//! drone.land().await?;
//! # Ok(())
//! # }
//! ```

mod channel;
mod command;
mod config;
mod errors;
mod feed;
mod options;
mod response;
mod state;
mod tello;
mod video;
pub mod wifi;

pub use channel::{CommandChannel, ConnectionState, ErrorAction, ErrorInterceptor};
pub use command::{
    Command, ControllerHardware, Direction, FlipDirection, MissionPad, MissionPadDetection, Position, TelloCommand,
    TelloCommandReceiver, TelloCommandSender, VideoBitrate, VideoFrameRate, VideoResolution,
};
pub use config::{TelloConfig, CONTROL_UDP_PORT, DEFAULT_DRONE_HOST, STATE_UDP_PORT, VIDEO_UDP_PORT};
pub use errors::{Result, TelloError};
pub use feed::{Feed, Subscription};
pub use options::TelloOptions;
pub use state::{Range, StateListener, StateSink, TelloState, TelloStateReceiver, TelloStateSender, Vector3};
pub use tello::{Connected, Disconnected, NoWifi, Tello};
pub use video::{
    FrameAssembler, TelloVideoFrame, TelloVideoReceiver, TelloVideoSender, VideoListener, VideoSink, MAX_CHUNK_SIZE,
    VIDEO_HEIGHT, VIDEO_WIDTH,
};
