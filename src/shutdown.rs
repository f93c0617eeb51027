use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Cooperative stop request shared between the signal watcher and the quest runner.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Watches for Ctrl+C / SIGTERM on a background thread. The first signal asks the
/// quest to stop after the current step; a second one exits immediately.
pub fn install(stop: StopSignal) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .map_err(|err| format!("signal runtime init failed: {}", err))?;

    std::thread::Builder::new()
        .name("questbot-signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    if let Err(err) = wait_for_signal().await {
                        warn!(error = %err, "signal handler unavailable");
                        return;
                    }
                    if stop.is_triggered() {
                        warn!("second interrupt, exiting now");
                        std::process::exit(130);
                    }
                    info!("interrupt received, stopping after the current step");
                    stop.trigger();
                }
            });
        })
        .map_err(|err| format!("signal thread spawn failed: {}", err))?;
    Ok(())
}

async fn wait_for_signal() -> std::io::Result<()> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        result = terminate() => result,
    }
}

#[cfg(unix)]
async fn terminate() -> std::io::Result<()> {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?
        .recv()
        .await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> std::io::Result<()> {
    std::future::pending().await
}
