//////////////////////////////////////////////////////////////////////////////
//
// Mission pads: hop between pads 1 and 2, placed about 1m apart
//
// Failed commands are reported and the flight carries on, rather than the
// default of landing and disconnecting
//
//////////////////////////////////////////////////////////////////////////////

extern crate tello_link;

use anyhow::anyhow;
use tello_link::{ErrorAction, MissionPad, MissionPadDetection, Position, Tello, TelloConfig, TelloError, TelloOptions};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    fly().await.unwrap();
}

async fn fly() -> anyhow::Result<()> {
    // optional tello.toml next to where this runs
    let config = match TelloConfig::load("tello.toml") {
        Ok(config) => config,
        Err(TelloError::IoError(_)) => TelloConfig::default(),
        Err(err) => return Err(err.into()),
    };

    let drone = Tello::new()
        .wait_for_wifi_with(&config, None).await?;

    let mut options = TelloOptions::with_config(config);
    options.with_error_interceptor(|err| {
        println!("carrying on after: {err}");
        ErrorAction::Continue
    });

    let drone = drone.connect_with(options).await?;

    drone.enable_mission_pads().await?;
    drone.set_mission_pad_detection(MissionPadDetection::Down).await?;

    drone.take_off().await?;

    let pad = |id| MissionPad::new(id).ok_or_else(|| anyhow!("no mission pad {id}"));
    let m1 = pad(1)?;
    let m2 = pad(2)?;

    drone.go_to_mission_pad(Position::new(0, 0, 80), 30, m1).await?;
    println!("over pad {:?}", drone.state().and_then(|s| s.detected_mission_pad()));

    drone.jump(Position::new(100, 0, 80), 30, 0, m1, m2).await?;
    println!("over pad {:?}", drone.state().and_then(|s| s.detected_mission_pad()));

    drone.land().await?;
    drone.disable_mission_pads().await?;

    drone.disconnect().await;

    Ok(())
}
