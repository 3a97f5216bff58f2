//! Where probe lines come from.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{LinesStream, UnboundedReceiverStream};
use tracing::{debug, info};

pub type LineStream = Pin<Box<dyn Stream<Item = std::io::Result<String>> + Send>>;

#[async_trait]
pub trait LineSource: Send + Sync {
    /// Start producing. The stream ends when the producer goes away.
    async fn open(&self) -> Result<LineStream>;

    fn describe(&self) -> String;
}

/// The probe executable, stdout piped. Dropping the stream kills the child.
#[derive(Debug, Clone)]
pub struct ProcessSource {
    executable: PathBuf,
    args: Vec<String>,
}

impl ProcessSource {
    pub fn new(executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
        }
    }
}

impl From<&paceconf::ProbeConfig> for ProcessSource {
    fn from(config: &paceconf::ProbeConfig) -> Self {
        Self::new(config.executable.clone(), config.args.clone())
    }
}

#[async_trait]
impl LineSource for ProcessSource {
    async fn open(&self) -> Result<LineStream> {
        let mut child = Command::new(&self.executable)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.executable.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("probe stdout was not captured"))?;
        info!(pid = ?child.id(), "probe process started: {}", self.executable.display());

        let stream = async_stream::stream! {
            let _child = child;
            let mut lines = LinesStream::new(BufReader::new(stdout).lines());
            while let Some(line) = lines.next().await {
                yield line;
            }
            debug!("probe stdout closed");
        };
        Ok(Box::pin(stream))
    }

    fn describe(&self) -> String {
        format!("process {}", self.executable.display())
    }
}

/// Lines pushed from inside the process. Each `open()` consumes the next
/// queued connection; dropping a connection's sender ends that stream.
#[derive(Debug, Default)]
pub struct ChannelSource {
    pending: Mutex<VecDeque<mpsc::UnboundedReceiver<String>>>,
}

impl ChannelSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection for the next `open()`.
    pub fn connection(&self) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(rx);
        tx
    }

    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl LineSource for ChannelSource {
    async fn open(&self) -> Result<LineStream> {
        let rx = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| anyhow!("no connection queued on channel source"))?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx).map(Ok::<_, std::io::Error>)))
    }

    fn describe(&self) -> String {
        "in-process channel".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_yields_pushed_lines() {
        let source = ChannelSource::new();
        let tx = source.connection();
        let stream = source.open().await.unwrap();

        tx.send("a".to_string()).unwrap();
        tx.send("b".to_string()).unwrap();
        drop(tx);

        let lines: Vec<String> = stream.map(|l| l.unwrap()).collect().await;
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_channel_source_without_connection_fails() {
        let source = ChannelSource::new();
        assert!(source.open().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_executable_fails_to_open() {
        let source = ProcessSource::new("/nonexistent/pacewatch-probe", vec![]);
        let err = source.open().await.err().unwrap();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
