//! Fire-and-forget backup hook run after a productive backfill.

use tokio::process::Command;

/// Run `command` through `sh -c` in the background. Failures are logged only.
pub(super) fn spawn_backup(command: &str) {
    let command = command.to_string();
    tracing::info!("Starting store backup: {}", command);

    tokio::spawn(async move {
        match Command::new("sh").arg("-c").arg(&command).status().await {
            Ok(status) if status.success() => {
                tracing::info!("Store backup completed");
            }
            Ok(status) => {
                tracing::error!("Store backup exited with {}", status);
            }
            Err(e) => {
                tracing::error!("Failed to run store backup: {}", e);
            }
        }
    });
}
