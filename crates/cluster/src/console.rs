//! Operator console on stdin.

use cluster_protocol::ConsoleCommands;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Feeds stdin lines to `commands` until stdin closes.
pub fn spawn_console(commands: ConsoleCommands) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("⌨️ Console ready, type 'help' for a list of commands");
        run_console(BufReader::new(tokio::io::stdin()), &commands).await;
        debug!("Console input closed");
    })
}

/// Returns the number of lines that named a known command.
pub async fn run_console<R>(input: R, commands: &ConsoleCommands) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut handled = 0;

    while let Ok(Some(line)) = lines.next_line().await {
        if commands.process(&line).is_some() {
            handled += 1;
        }
    }

    handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_protocol::CommandResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_lines_are_dispatched_in_order() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut commands = ConsoleCommands::new();
        let counter = seen.clone();
        commands.add("ping", "", "Counts", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            CommandResult::Okay
        });

        let input: &[u8] = b"ping\n\nbogus\nPING extra\nhelp\n";
        let handled = run_console(input, &commands).await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(handled, 3);
    }
}
