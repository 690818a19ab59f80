//! Fixed-interval loop around [`Collector::run_cycle`].

use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info};

use crate::cycle::Collector;
use crate::error::error_chain;

/// Run cycles until a shutdown signal arrives, or once when `once` is set.
///
/// A failed cycle is logged and the loop continues. Signals are only acted on
/// while sleeping; a cycle in progress always runs to completion. The handlers
/// are installed before the first cycle, so a signal that arrives mid-cycle
/// stops the loop at the next sleep.
pub async fn run(collector: &mut Collector, interval: Duration, once: bool) {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        match collector.run_cycle().await {
            Ok(report) => {
                info!(
                    delivered = report.delivered,
                    failed = report.failed,
                    "Cycle completed"
                );
            }
            Err(e) => {
                error!(error = %error_chain(&e), "Cycle failed, savepoint left unchanged");
            }
        }

        if once {
            break;
        }

        info!(seconds = interval.as_secs(), "Sleeping until next cycle");
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            () = &mut shutdown => break,
        }
    }

    info!("Incident sender stopped");
}

/// Resolves on SIGINT or SIGTERM. Handlers are registered when this is called,
/// not when the future is first polled.
#[cfg(unix)]
fn shutdown_signal() -> impl Future<Output = ()> {
    use signal::unix::{signal as listen, SignalKind};

    let interrupt = listen(SignalKind::interrupt());
    let terminate = listen(SignalKind::terminate());

    async move {
        let (mut interrupt, mut terminate) = match (interrupt, terminate) {
            (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                return std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = interrupt.recv() => {
                info!("Received Ctrl+C, shutting down gracefully");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down gracefully");
            },
        }
    }
}

#[cfg(not(unix))]
fn shutdown_signal() -> impl Future<Output = ()> {
    async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down gracefully"),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    }
}
