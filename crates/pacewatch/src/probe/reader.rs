//! The single task draining probe output onto the frame bus.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::heartbeat::{ProducerHealth, ProducerState};
use super::processes::ProcessRegistry;
use super::source::LineStream;
use crate::bus::FrameBus;
use crate::frame;
use crate::schema::ProbeSchema;

pub(crate) struct Reader {
    pub schema: ProbeSchema,
    pub negotiate_schema: bool,
    pub bus: FrameBus,
    pub health: Arc<ProducerHealth>,
    pub registry: Arc<ProcessRegistry>,
}

impl Reader {
    fn handle_line(&mut self, line: &str) {
        self.health.record_line();
        if line.trim().is_empty() {
            return;
        }

        if self.schema.is_header(line) {
            if self.negotiate_schema {
                match ProbeSchema::from_header(line) {
                    Ok(schema) => {
                        debug!(fields = schema.field_count, "schema negotiated from probe header");
                        self.schema = schema;
                    }
                    Err(e) => warn!("keeping configured schema: {}", e),
                }
            }
            return;
        }

        match frame::parse(line, &self.schema) {
            Ok(sample) => {
                self.registry.observe(&sample.process_name, sample.pid);
                self.bus.publish(sample);
            }
            Err(e) => {
                self.health.record_parse_failure();
                trace!("skipping probe line: {}", e);
            }
        }
    }

    /// Drain `stream` until it ends or `cancel` fires. The producer is
    /// marked terminated only when the stream itself ends.
    pub async fn run(mut self, mut stream: LineStream, cancel: CancellationToken) {
        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(line)) => self.handle_line(&line),
                    Some(Err(e)) => {
                        warn!("probe output failed: {}", e);
                        self.health.set_state(ProducerState::Terminated);
                        break;
                    }
                    None => {
                        info!("probe output ended");
                        self.health.set_state(ProducerState::Terminated);
                        break;
                    }
                },
                _ = cancel.cancelled() => {
                    debug!("reader task shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::presentmon_line;
    use crate::schema::PRESENTMON_HEADER;

    fn reader(bus: &FrameBus) -> Reader {
        Reader {
            schema: ProbeSchema::presentmon(true),
            negotiate_schema: true,
            bus: bus.clone(),
            health: Arc::new(ProducerHealth::new()),
            registry: Arc::new(ProcessRegistry::new()),
        }
    }

    #[tokio::test]
    async fn test_header_renegotiates_and_frames_flow() {
        let bus = FrameBus::new(16);
        let mut rx = bus.subscribe();
        let mut r = reader(&bus);

        r.handle_line(PRESENTMON_HEADER);
        assert_eq!(r.schema, ProbeSchema::presentmon(false));

        r.handle_line(&presentmon_line("game.exe", 10, 1000.0, 16.6));
        let got = rx.try_recv().unwrap();
        assert_eq!(got.process_name, "game");
        assert!(r.registry.contains("game", 10));
    }

    #[tokio::test]
    async fn test_bad_lines_are_counted_and_skipped() {
        let bus = FrameBus::new(16);
        let mut rx = bus.subscribe();
        let mut r = reader(&bus);
        r.schema = ProbeSchema::presentmon(false);

        r.handle_line("garbage");
        r.handle_line(&presentmon_line("<error>", 1, 0.0, 1.0));
        r.handle_line("");

        assert!(rx.try_recv().is_none());
        assert_eq!(r.health.parse_failures(), 2);
        assert_eq!(r.health.lines(), 3);
    }

    #[tokio::test]
    async fn test_end_of_stream_terminates() {
        let bus = FrameBus::new(16);
        let r = reader(&bus);
        let health = r.health.clone();
        health.set_state(ProducerState::Running);

        let lines = vec![Ok::<_, std::io::Error>(presentmon_line("game.exe", 1, 0.0, 10.0))];
        let stream: LineStream = Box::pin(futures::stream::iter(lines));
        r.run(stream, CancellationToken::new()).await;
        assert_eq!(health.state(), ProducerState::Terminated);
    }
}
