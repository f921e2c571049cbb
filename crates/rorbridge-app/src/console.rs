//! Terminal chat adapter: the bridged channel is stdout, and every line typed
//! on stdin is a message from a local operator.

use std::io::{self, BufRead};

use rorbridge_bridge::{ChatPlatform, InboundChat, PermissionLevel, PlatformError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const OUTPUT_BUFFER: usize = 256;

/// Posts go through a channel to a writer task that owns the output.
pub struct ConsoleChat {
    lines: mpsc::Sender<String>,
}

impl ConsoleChat {
    /// Start the writer task on `out`. It finishes once the `ConsoleChat` is dropped.
    pub fn spawn<W>(out: W) -> (Self, JoinHandle<io::Result<()>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (lines, rx) = mpsc::channel(OUTPUT_BUFFER);
        (Self { lines }, tokio::spawn(write_lines(out, rx)))
    }
}

async fn write_lines<W>(mut out: W, mut rx: mpsc::Receiver<String>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
    }
    Ok(())
}

impl ChatPlatform for ConsoleChat {
    async fn send(&self, channel: &str, text: &str) -> Result<(), PlatformError> {
        let mut rendered = String::new();
        for line in text.lines() {
            rendered.push_str(&format!("[#{channel}] {line}\n"));
        }
        self.lines.send(rendered).await.map_err(|_| PlatformError::Closed)
    }
}

/// Forward lines from `input` as messages by `author` until EOF or until the
/// bridge stops listening. Blocks; run it on its own thread.
pub fn read_inbound<R: BufRead>(
    input: R,
    channel: &str,
    author: &str,
    permission: PermissionLevel,
    tx: mpsc::Sender<InboundChat>,
) -> io::Result<()> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let message = InboundChat {
            channel: channel.to_string(),
            author: author.to_string(),
            permission,
            text: line,
        };
        if tx.blocking_send(message).is_err() {
            break;
        }
    }
    Ok(())
}
