extern crate tello_link;

use tello_link::{TelloOptions, Tello, Result};


#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut options = TelloOptions::default();

    // we want video...
    let mut video_receiver = options.with_video();

    tokio::spawn(async move {
        while let Some(frame) = video_receiver.recv().await {
            println!("video frame: {} bytes", frame.data.len());
        }
    });

    fly(options).await.unwrap();
}


async fn fly(options:TelloOptions) -> Result<()> {
    let drone = Tello::new()
        .wait_for_wifi().await?;

    let drone = drone.connect_with(options).await?;

    drone.start_video().await?;

    drone.take_off().await?;
    drone.land().await?;

    drone.stop_video().await?;
    drone.disconnect().await;

    Ok(())
}
