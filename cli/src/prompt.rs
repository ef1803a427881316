//! Terminal prompt for interactive port changes.

use proxyport_core::ports::PortPrompt;
use proxyport_core::PortNumber;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Reads the new port from stdin.
pub struct StdinPrompt;

impl PortPrompt for StdinPrompt {
    async fn ask_port(
        &self,
        current: PortNumber,
        suggested: PortNumber,
    ) -> std::io::Result<Option<String>> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("Current port: {}\nNew port [{}]: ", current, suggested).as_bytes())
            .await?;
        stdout.flush().await?;

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        // EOF (Ctrl-D) or an explicit quit
        if read == 0 || matches!(line.trim(), "q" | "quit") {
            return Ok(None);
        }
        Ok(Some(line))
    }
}
