// src/utils/streams.rs
use std::io;

use anyhow::{anyhow, Result};
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChildStream {
    Stdout,
    Stderr,
}

/// Reads all lines of one child stream. Used for short-lived version probes.
pub async fn read_child_output_to_vec(child: &mut Child, stream: ChildStream) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    match stream {
        ChildStream::Stdout => {
            let out = child.stdout.take().ok_or_else(|| anyhow!("Child stdout not captured"))?;
            let mut reader = BufReader::new(out).lines();
            while let Some(line) = reader.next_line().await? {
                lines.push(line);
            }
        }
        ChildStream::Stderr => {
            let err = child.stderr.take().ok_or_else(|| anyhow!("Child stderr not captured"))?;
            let mut reader = BufReader::new(err).lines();
            while let Some(line) = reader.next_line().await? {
                lines.push(line);
            }
        }
    }
    Ok(lines)
}


/// Fixed-size chunk stream over an async reader; ends at EOF or after the first error.
pub fn chunk_stream<R>(reader: R, chunk_size: usize) -> impl Stream<Item = io::Result<Vec<u8>>> + Unpin
where
    R: AsyncRead + Unpin,
{
    Box::pin(futures::stream::unfold(Some(reader), move |state| async move {
        let mut reader = state?;
        let mut buf = vec![0u8; chunk_size];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    }))
}


/// Forwards every line of `reader` into `tx` until EOF or until the receiver is gone.
fn spawn_line_forwarder<R>(reader: R, tx: mpsc::Sender<String>) -> JoinHandle<io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if tx.send(line).await.is_err() {
                break;
            }
        }
        Ok(())
    })
}

/// Merges a child's stdout and stderr into a single line channel, in arrival order.
///
/// The channel closes once both streams reach EOF.
pub fn merge_child_output(
    child: &mut Child,
    buffer: usize,
) -> Result<(mpsc::Receiver<String>, Vec<JoinHandle<io::Result<()>>>)> {
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("Child stdout not captured"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("Child stderr not captured"))?;
    let (tx, rx) = mpsc::channel(buffer);
    let tasks = vec![
        spawn_line_forwarder(stdout, tx.clone()),
        spawn_line_forwarder(stderr, tx),
    ];
    Ok((rx, tasks))
}
