#![forbid(unsafe_code)]

use flume::Sender;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGUSR1: log queue and governor status.
    DumpStatus,
    /// SIGHUP: evaluate the limit profile right now.
    ReapplyPolicy,
    /// SIGINT or SIGTERM.
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to install {name} handler: {source}")]
    Install {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("signal receiver went away")]
    Closed,
}

fn install(kind: SignalKind, name: &'static str) -> Result<Signal, Error> {
    signal(kind).map_err(|source| Error::Install { name, source })
}

/// Forward process signals as [`SignalEvent`]s until `cancel` fires.
pub async fn wait_for_signal(
    tx: Sender<SignalEvent>,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut usr1 = install(SignalKind::user_defined1(), "SIGUSR1")?;
    let mut hup = install(SignalKind::hangup(), "SIGHUP")?;
    let mut int = install(SignalKind::interrupt(), "SIGINT")?;
    let mut term = install(SignalKind::terminate(), "SIGTERM")?;
    debug!("signal handlers installed");

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = usr1.recv() => SignalEvent::DumpStatus,
            _ = hup.recv() => SignalEvent::ReapplyPolicy,
            _ = int.recv() => {
                info!("received SIGINT");
                SignalEvent::Shutdown
            }
            _ = term.recv() => {
                info!("received SIGTERM");
                SignalEvent::Shutdown
            }
        };
        tx.send_async(event).await.map_err(|_| Error::Closed)?;
    }
}
