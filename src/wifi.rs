use std::time::Duration;

use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::{Result, TelloError};

//////////////////////////////////////////////////////////////////////////////
// macOS

#[cfg(target_os = "macos")]
async fn list_wifi_devices() -> Result<Vec<String>> {
    let output = run_command("networksetup", &["-listallhardwareports"]).await?;
    Ok(parse_wifi_devices(&output))
}

/// Picks the device names out of `networksetup -listallhardwareports`.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_wifi_devices(output: &str) -> Vec<String> {
    let mut found_wifi = false;
    let mut devices: Vec<String> = vec![];
    for l in output.lines() {
        if !found_wifi {
            // looking for something like "Hardware Port: Wi-Fi"...
            found_wifi = l.contains("Wi-Fi");
        } else {
            // ...then next line should be like "Device: en1"
            found_wifi = false;
            devices.push(l.trim().trim_start_matches("Device: ").to_string());
        }
    }
    devices
}

#[cfg(target_os = "macos")]
pub async fn is_connected_to(ssid_prefix: &str) -> Result<bool> {
    let waiting_for = format!("Current Wi-Fi Network: {ssid_prefix}");
    for device in list_wifi_devices().await? {
        let s = run_command("networksetup", &["-getairportnetwork", &device]).await?;
        if s.starts_with(&waiting_for) {
            return Ok(true);
        }
    }
    Ok(false)
}

//////////////////////////////////////////////////////////////////////////////
// linux

#[cfg(target_os = "linux")]
pub async fn is_connected_to(ssid_prefix: &str) -> Result<bool> {
    let s = run_command("iwgetid", &["-r"]).await?;
    Ok(s.starts_with(ssid_prefix))
}

//////////////////////////////////////////////////////////////////////////////
// anything else

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub async fn is_connected_to(_ssid_prefix: &str) -> Result<bool> {
    warn!("WiFi check has not been implemented for this OS, assuming joined already and continuing");
    Ok(true)
}

//////////////////////////////////////////////////////////////////////////////

/// Polls until the machine is on a network whose SSID starts with
/// `ssid_prefix`, or gives up with `WiFiNotConnected` after `attempts` tries
/// when a limit is given.
pub async fn wait_for_wifi(ssid_prefix: &str, poll_interval: Duration, attempts: Option<u32>) -> Result<()> {
    let mut tries = 0;
    loop {
        tries += 1;
        match is_connected_to(ssid_prefix).await {
            Ok(true) => return Ok(()),
            Ok(false) => debug!("not on {ssid_prefix}* yet (try #{tries})"),
            Err(err) => warn!("WiFi check failed: {err}"),
        }

        if attempts.is_some_and(|limit| tries >= limit) {
            return Err(TelloError::WiFiNotConnected);
        }
        sleep(poll_interval).await;
    }
}

#[cfg_attr(not(any(target_os = "macos", target_os = "linux")), allow(dead_code))]
async fn run_command(cmd: &str, args: &[&str]) -> Result<String> {
    let raw_output = Command::new(cmd)
        .args(args)
        .output()
        .await
        .map_err(|e| TelloError::Generic { msg: format!("failed to run {cmd} - {e}") })?;

    String::from_utf8(raw_output.stdout)
        .map_err(|e| TelloError::Generic { msg: format!("failed to decode {cmd} output - {e:?}") })
}
