//! Start/stop control over a background ingestion task.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tzdeleg_core::metrics::set_gauge;

use crate::engine::IngestionEngine;
use crate::{Error, Result};

struct RunningTask {
    stop: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

/// Owns the engine's background task.
///
/// `Send + Sync`: `stop()` may be called from any task.
pub struct IngestionController {
    engine: Arc<IngestionEngine>,
    running: Mutex<Option<RunningTask>>,
}

impl IngestionController {
    pub fn new(engine: Arc<IngestionEngine>) -> Self {
        Self {
            engine,
            running: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<IngestionEngine> {
        &self.engine
    }

    /// Spawn the engine and return immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Err(Error::AlreadyStarted);
        }

        let stop = CancellationToken::new();
        let engine = Arc::clone(&self.engine);
        let token = stop.clone();
        let handle = tokio::spawn(async move { engine.run(token).await });

        *running = Some(RunningTask { stop, handle });
        set_gauge("ingestion_running", 1.0);
        tracing::info!("Ingestion started");
        Ok(())
    }

    /// Signal the engine to stop and wait for it to finish its current tick.
    ///
    /// A no-op when never started.
    pub async fn stop(&self) -> Result<()> {
        let task = self.running.lock().take();
        let Some(task) = task else {
            return Ok(());
        };

        tracing::info!("Stopping ingestion...");
        task.stop.cancel();
        let result = task.handle.await;
        set_gauge("ingestion_running", 0.0);

        result??;
        tracing::info!("Ingestion stopped");
        Ok(())
    }

    /// Whether the background task is alive.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }
}
