use anyhow::Result;

/// Makes sure the host Bluetooth service is running, starting it if needed.
#[cfg(target_os = "linux")]
pub async fn ensure_bluetooth_service() -> Result<()> {
    use anyhow::{bail, Context};
    use log::info;
    use std::time::Duration;
    use tokio::process::Command;

    let status = Command::new("systemctl")
        .args(["is-active", "bluetooth"])
        .output()
        .await;
    if let Ok(output) = status {
        if is_active(&output.stdout) {
            return Ok(());
        }
    }

    info!("Bluetooth service not running, attempting to start...");
    let started = Command::new("systemctl")
        .args(["start", "bluetooth"])
        .status()
        .await
        .context("Failed to run systemctl")?;
    if !started.success() {
        bail!("systemctl start bluetooth exited with {}", started);
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    info!("Bluetooth service started");
    Ok(())
}

/// The platform manages the Bluetooth stack itself.
#[cfg(not(target_os = "linux"))]
pub async fn ensure_bluetooth_service() -> Result<()> {
    Ok(())
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn is_active(stdout: &[u8]) -> bool {
    String::from_utf8_lossy(stdout).trim() == "active"
}
