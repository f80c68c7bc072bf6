use std::io;

#[cfg(not(windows))]
use tokio::signal::unix::signal;
#[cfg(not(windows))]
use tokio::signal::unix::SignalKind;

/// Wait for SIGINT or SIGTERM.
#[cfg(not(windows))]
pub async fn interrupt() -> io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(windows)]
pub async fn interrupt() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
