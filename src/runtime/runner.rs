use crate::stream::InputStream;
use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Drives an input stream until the process is asked to stop.
pub struct Runner {
    stream: InputStream,
    shutdown: CancellationToken,
}

impl Runner {
    /// Wraps `stream`; its root cancellation token becomes the runner's shutdown token.
    pub fn new(stream: InputStream) -> Self {
        let shutdown = stream.cancellation_token();
        Self { stream, shutdown }
    }

    pub fn stream(&self) -> &InputStream {
        &self.stream
    }

    /// Returns a clone of the shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere,
    /// then closes the stream and waits for running ticks to finish.
    pub async fn run_until_ctrl_c(&self) -> Result<()> {
        self.stream.start()?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.shutdown.cancel();
        self.stream.shutdown().await;
        Ok(())
    }
}
