extern crate tello_link;

use tello_link::{TelloOptions, Tello, Result};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    fly().await.unwrap();
}

async fn fly() -> Result<()> {
    let drone = Tello::new()
        .wait_for_wifi().await?;

    let mut options = TelloOptions::default();
    let mut state_rx = options.with_state();

    tokio::spawn(async move {
        while let Some(state) = state_rx.recv().await {
            println!("STATE {state:#?}");
        }
    });

    let drone = drone.connect_with(options).await?;

    // await-next form: only broadcasts arriving from here on
    let mut states = drone.state_stream();
    if let Some(state) = states.next().await {
        println!("battery {:?}%, height {:?}cm", state.battery, state.height);
    }

    drone.take_off().await?;
    drone.turn_clockwise(360).await?;
    drone.land().await?;

    drone.disconnect().await;

    Ok(())
}
