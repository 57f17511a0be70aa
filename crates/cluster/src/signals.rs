//! Termination signals and the stop sequence they trigger.
//!
//! Both roles stop the same way: the signal names itself in the log, the
//! node is told to stop accepting, and its serving task gets a grace period
//! to wind down before it is aborted.

use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Which request to terminate arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGINT, or Ctrl+C on Windows
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Interrupt => f.write_str("SIGINT"),
            Termination::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Waits for the process to be asked to terminate.
pub async fn wait_for_termination() -> std::io::Result<Termination> {
    #[cfg(unix)]
    let received = {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = interrupt.recv() => Termination::Interrupt,
            _ = terminate.recv() => Termination::Terminate,
        }
    };

    #[cfg(windows)]
    let received = {
        tokio::signal::ctrl_c().await?;
        Termination::Interrupt
    };

    Ok(received)
}

/// Runs the stop sequence of a node after `termination`.
///
/// # Arguments
///
/// * `role` - node name used in the log lines
/// * `stop` - asks the node to stop accepting, e.g. `RegistryServer::shutdown`
/// * `task` - the node's serving task
/// * `grace` - how long the serving task may take before it is aborted
///
/// # Returns
///
/// The serving task's own error if it failed while stopping. A task that
/// overruns `grace` is aborted and counts as stopped.
pub async fn stop_node<E>(
    role: &str,
    termination: Termination,
    stop: impl FnOnce(),
    task: &mut JoinHandle<Result<(), E>>,
    grace: Duration,
) -> anyhow::Result<()>
where
    E: std::error::Error + Send + Sync + 'static,
{
    info!("🛑 {} received, stopping {}", termination, role);
    stop();

    match tokio::time::timeout(grace, &mut *task).await {
        Ok(joined) => {
            joined??;
            info!("✅ {} stopped cleanly", role);
        }
        Err(_) => {
            warn!("{} did not stop within {}s, aborting", role, grace.as_secs());
            task.abort();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_stop_reaches_the_serving_task() {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let mut task = tokio::spawn(async move {
            let _ = stop_rx.await;
            Ok::<(), io::Error>(())
        });

        let result = stop_node(
            "registry",
            Termination::Terminate,
            move || {
                let _ = stop_tx.send(());
            },
            &mut task,
            Duration::from_secs(5),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_task_is_aborted_after_grace() {
        let mut task = tokio::spawn(async {
            std::future::pending::<()>().await;
            Ok::<(), io::Error>(())
        });

        let result = stop_node("channel", Termination::Interrupt, || {}, &mut task, Duration::from_secs(5)).await;
        assert!(result.is_ok());
        let joined = task.await;
        assert!(joined.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_serving_error_is_reported() {
        let mut task = tokio::spawn(async { Err::<(), io::Error>(io::Error::other("accept failed")) });

        let result = stop_node("channel", Termination::Interrupt, || {}, &mut task, Duration::from_secs(5)).await;
        assert!(result.unwrap_err().to_string().contains("accept failed"));
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(Termination::Interrupt.to_string(), "SIGINT");
        assert_eq!(Termination::Terminate.to_string(), "SIGTERM");
    }
}
