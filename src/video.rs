use std::fmt;
use std::net::SocketAddr;

use bytebuffer::ByteBuffer;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::{spawn, task};
use tracing::{debug, info, warn};

use crate::errors::Result;

pub const VIDEO_WIDTH: u32 = 960;
pub const VIDEO_HEIGHT: u32 = 720;

pub const MAX_CHUNK_SIZE: usize = 1460;

// room to notice a datagram longer than a chunk should be
const RECEIVE_BUFFER_SIZE: usize = 2048;

pub type TelloVideoSender = mpsc::UnboundedSender<TelloVideoFrame>;
pub type TelloVideoReceiver = mpsc::UnboundedReceiver<TelloVideoFrame>;

pub fn make_tello_video_channel() -> (TelloVideoSender, TelloVideoReceiver) {
    mpsc::unbounded_channel()
}

/// Where each reassembled frame goes.
pub type VideoSink = Box<dyn FnMut(TelloVideoFrame) + Send>;

/// A frame of h264-encoded video from the drone.
#[derive(Debug, Clone, PartialEq)]
pub struct TelloVideoFrame {
    pub data: Vec<u8>,
}

/// Joins video chunks back into frames.
///
/// The stream has no headers: a full-size chunk means more of the same frame
/// follows, anything else ends it. A frame whose length is an exact multiple
/// of `MAX_CHUNK_SIZE` therefore isn't seen as complete until the next
/// frame's first short chunk arrives, and the two come out joined. Lost or
/// reordered chunks corrupt frames the same way, undetected.
pub struct FrameAssembler {
    buf: ByteBuffer,
}

impl fmt::Debug for FrameAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameAssembler").field("pending", &self.pending()).finish()
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self { buf: ByteBuffer::new() }
    }
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chunk, returning the frame it completes, if any.
    pub fn push(&mut self, chunk: &[u8]) -> Option<TelloVideoFrame> {
        if chunk.is_empty() && self.pending() == 0 {
            return None;
        }

        self.buf.write_bytes(chunk);

        if chunk.len() == MAX_CHUNK_SIZE {
            return None;
        }

        let buf = std::mem::replace(&mut self.buf, ByteBuffer::new());
        Some(TelloVideoFrame { data: buf.into_vec() })
    }

    /// Bytes collected towards the current frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Receives the drone's video chunks and hands each reassembled frame to a
/// sink.
#[derive(Debug)]
pub struct VideoListener {
    task: task::JoinHandle<()>,
    local_addr: SocketAddr,
}

impl VideoListener {
    pub async fn start_listening(port: u16, mut sink: VideoSink) -> Result<Self> {
        let local_address = format!("0.0.0.0:{port}");
        info!("START LISTENING at {local_address}");

        let sock = UdpSocket::bind(&local_address).await?;
        let local_addr = sock.local_addr()?;

        let task = spawn(async move {
            let mut assembler = FrameAssembler::new();
            let mut chunk = vec![0; RECEIVE_BUFFER_SIZE];
            loop {
                let n = match sock.recv(&mut chunk).await {
                    Ok(n) => n,
                    Err(err) => {
                        warn!("receive failed: {err}");
                        continue;
                    }
                };

                if n > MAX_CHUNK_SIZE {
                    debug!("oversized video chunk ({n} bytes)");
                }

                if let Some(frame) = assembler.push(&chunk[..n]) {
                    sink(frame);
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

impl Drop for VideoListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn short_chunk_completes_frame() {
        let mut assembler = FrameAssembler::new();

        assert!(assembler.push(&[1; MAX_CHUNK_SIZE]).is_none());
        assert!(assembler.push(&[2; MAX_CHUNK_SIZE]).is_none());
        let frame = assembler.push(&[3; 732]).unwrap();

        assert_eq!(frame.data.len(), 3652);
        assert_eq!(frame.data[0], 1);
        assert_eq!(frame.data[MAX_CHUNK_SIZE], 2);
        assert_eq!(frame.data[3651], 3);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn full_size_chunks_wait_for_a_short_one() {
        let mut assembler = FrameAssembler::new();

        for _ in 0..3 {
            assert!(assembler.push(&[0; MAX_CHUNK_SIZE]).is_none());
        }
        assert_eq!(assembler.pending(), 3 * MAX_CHUNK_SIZE);

        // the next frame's short chunk closes both
        let frame = assembler.push(&[9; 100]).unwrap();
        assert_eq!(frame.data.len(), 3 * MAX_CHUNK_SIZE + 100);
    }

    #[test]
    fn single_small_chunk_is_a_frame() {
        let mut assembler = FrameAssembler::new();
        assert_eq!(assembler.push(b"tiny").unwrap().data, b"tiny");
    }

    #[test]
    fn empty_chunk() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(&[]).is_none());

        assembler.push(&[5; MAX_CHUNK_SIZE]);
        let frame = assembler.push(&[]).unwrap();
        assert_eq!(frame.data.len(), MAX_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn listener_reassembles_datagrams() {
        let (tx, mut rx) = make_tello_video_channel();
        let listener = VideoListener::start_listening(0, Box::new(move |frame| {
            let _ = tx.send(frame);
        }))
        .await
        .unwrap();

        let target = SocketAddr::from(([127, 0, 0, 1], listener.local_addr().port()));
        let drone = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        drone.send_to(&[1; MAX_CHUNK_SIZE], target).await.unwrap();
        drone.send_to(&[2; 40], target).await.unwrap();
        drone.send_to(&[3; 10], target).await.unwrap();

        let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.data.len(), MAX_CHUNK_SIZE + 40);

        let second = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(second.data, vec![3; 10]);

        listener.stop_listening().await;
    }
}
