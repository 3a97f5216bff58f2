//! Single-writer, multi-subscriber fan-out of parsed frames.
//!
//! The reader task is the only publisher. Every subscriber gets its own
//! bounded queue; a subscriber that falls behind loses the oldest frames,
//! logs how many, and keeps going. The reader never waits on a subscriber.

use std::sync::Arc;

use futures::stream::Stream;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::frame::FrameSample;

#[derive(Debug, Clone)]
pub struct FrameBus {
    tx: broadcast::Sender<Arc<FrameSample>>,
}

impl FrameBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers will see the frame.
    pub fn publish(&self, sample: FrameSample) -> usize {
        self.tx.send(Arc::new(sample)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> FrameReceiver {
        FrameReceiver {
            rx: self.tx.subscribe(),
            pid: None,
            lagged: 0,
        }
    }

    /// Subscription that only yields frames from `pid`.
    pub fn subscribe_pid(&self, pid: u32) -> FrameReceiver {
        FrameReceiver {
            pid: Some(pid),
            ..self.subscribe()
        }
    }

    /// Frames as a stream, lagged gaps skipped.
    pub fn stream(&self) -> impl Stream<Item = Arc<FrameSample>> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|result| match result {
            Ok(sample) => Some(sample),
            Err(e) => {
                debug!("frame stream gap: {}", e);
                None
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct FrameReceiver {
    rx: broadcast::Receiver<Arc<FrameSample>>,
    pid: Option<u32>,
    lagged: u64,
}

impl FrameReceiver {
    fn wanted(&self, sample: &FrameSample) -> bool {
        self.pid.map_or(true, |pid| sample.pid == pid)
    }

    /// Next matching frame. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<FrameSample>> {
        loop {
            match self.rx.recv().await {
                Ok(sample) if self.wanted(&sample) => return Some(sample),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    self.lagged += n;
                    warn!(skipped = n, "frame subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching frame already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<FrameSample>> {
        loop {
            match self.rx.try_recv() {
                Ok(sample) if self.wanted(&sample) => return Some(sample),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(n)) => {
                    self.lagged += n;
                    warn!(skipped = n, "frame subscriber lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Frames dropped because this subscriber fell behind.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pid: u32, t: f64) -> FrameSample {
        FrameSample {
            process_name: format!("proc{pid}"),
            pid,
            timestamp_seconds: t,
            frame_time_ms: 16.0,
            swap_chain: None,
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_frame() {
        let bus = FrameBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(frame(1, 0.0)), 2);
        assert_eq!(a.recv().await.unwrap().timestamp_seconds, 0.0);
        assert_eq!(b.recv().await.unwrap().timestamp_seconds, 0.0);
    }

    #[tokio::test]
    async fn test_pid_filter() {
        let bus = FrameBus::new(16);
        let mut rx = bus.subscribe_pid(7);
        bus.publish(frame(1, 0.0));
        bus.publish(frame(7, 1.0));
        bus.publish(frame(2, 2.0));

        let got = rx.recv().await.unwrap();
        assert_eq!((got.pid, got.timestamp_seconds), (7, 1.0));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_continues() {
        let bus = FrameBus::new(4);
        let mut rx = bus.subscribe();
        for i in 0..10 {
            bus.publish(frame(1, i as f64));
        }
        let first = rx.recv().await.unwrap();
        assert_eq!(first.timestamp_seconds, 6.0);
        assert_eq!(rx.lagged(), 6);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = FrameBus::new(4);
        assert_eq!(bus.publish(frame(1, 0.0)), 0);
    }

    #[tokio::test]
    async fn test_closed_bus_ends_receiver() {
        let bus = FrameBus::new(4);
        let mut rx = bus.subscribe();
        drop(bus);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_view() {
        let bus = FrameBus::new(8);
        let stream = bus.stream();
        tokio::pin!(stream);
        bus.publish(frame(3, 0.5));
        let got = stream.next().await.unwrap();
        assert_eq!(got.pid, 3);
    }
}
