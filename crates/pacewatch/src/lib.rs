//! pacewatch - frame-pacing telemetry capture and frame-time statistics
//!
//! Probe lines flow through a single reader task onto the frame bus. The
//! capture orchestrator subscribes a per-process view into the active
//! session and the live metric window; sealed sessions go to a sink.

pub mod bus;
pub mod capture;
pub mod frame;
pub mod online;
pub mod probe;
pub mod ring_buffer;
pub mod schema;
pub mod stats;
pub mod telemetry;

pub use bus::{FrameBus, FrameReceiver};
pub use capture::{
    CaptureError, CaptureFileMode, CaptureOptions, CaptureOrchestrator, CaptureSettings,
    CaptureStatus, MemorySink, ReportSink, Session, SessionReport, SessionSink, StartOutcome,
    StatusUpdate, StopOutcome,
};
pub use frame::{parse, FrameSample, ParseError};
pub use online::OnlineMetricState;
pub use probe::{
    ChannelSource, LineSource, ProbeError, ProbeService, ProbeSettings, ProcessSource,
    ProducerState,
};
pub use ring_buffer::{BufferError, RingBuffer};
pub use schema::ProbeSchema;
pub use stats::{FrametimeStatistics, Metric, OutlierMethod, StatisticsOptions};
