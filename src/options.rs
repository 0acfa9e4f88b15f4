use std::fmt;

use crate::channel::{ErrorAction, ErrorInterceptor};
use crate::command::*;
use crate::config::TelloConfig;
use crate::errors::TelloError;
use crate::state::*;
use crate::video::*;

/// Tello drone connection and other usage options.
#[derive(Default)]
pub struct TelloOptions {
    pub(crate) config: TelloConfig,
    pub(crate) state_sender: Option<TelloStateSender>,
    pub(crate) video_sender: Option<TelloVideoSender>,
    pub(crate) video: bool,
    pub(crate) command_receiver: Option<TelloCommandReceiver>,
    pub(crate) interceptor: Option<ErrorInterceptor>,
}

impl fmt::Debug for TelloOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelloOptions")
            .field("config", &self.config)
            .field("state", &self.state_sender.is_some())
            .field("video", &self.video)
            .field("command", &self.command_receiver.is_some())
            .field("interceptor", &self.interceptor.is_some())
            .finish()
    }
}

impl TelloOptions {
    pub fn with_config(config: TelloConfig) -> Self {
        Self { config, ..Self::default() }
    }

    pub fn config(&self) -> &TelloConfig {
        &self.config
    }

    /// Request state updates from the drone.
    ///
    /// *nb* As messages are sent to the UDP broadcast address 0.0.0.0 this
    /// only works in AP mode, ie using the drone's own WiFi network
    ///
    /// Returns the receiver end of the channel used to pass on updates
    ///
    pub fn with_state(&mut self) -> TelloStateReceiver {
        let (tx, rx) = make_tello_state_channel();
        self.state_sender = Some(tx);
        rx
    }

    /// Request video from the drone as a stream of h264-encoded 720p YUV
    /// frames.
    ///
    /// *nb* As messages are sent to the UDP broadcast address 0.0.0.0 this
    /// only works in AP mode, ie using the drone's own WiFi network
    ///
    /// Returns the receiver end of the channel used to pass on frames
    ///
    pub fn with_video(&mut self) -> TelloVideoReceiver {
        let (tx, rx) = make_tello_video_channel();
        self.video_sender = Some(tx);
        self.video = true;
        rx
    }

    /// Listen for video without a channel, eg when only the latest frame
    /// (`Tello::video_frame`) or `Tello::video_stream` is wanted.
    pub fn with_video_feed(&mut self) -> &mut Self {
        self.video = true;
        self
    }

    /// Returns the sender end of a channel for issuing commands to the
    /// drone, eg for a remote control application.
    ///
    pub fn with_command(&mut self) -> TelloCommandSender {
        let (tx, rx) = make_tello_command_channel();
        self.command_receiver = Some(rx);
        tx
    }

    /// Decide for yourself what happens when a command times out, is
    /// rejected or gets a garbled reply. Without one the drone is landed (if
    /// flying) and the connection closed.
    pub fn with_error_interceptor<F>(&mut self, interceptor: F) -> &mut Self
    where
        F: Fn(&TelloError) -> ErrorAction + Send + Sync + 'static,
    {
        self.interceptor = Some(Box::new(interceptor));
        self
    }
}
