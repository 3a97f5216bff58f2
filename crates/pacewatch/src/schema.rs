//! Column layout of the probe's CSV output.
//!
//! Probe versions disagree on column order and count, so indices are
//! negotiated once, either from the header line the probe prints first or
//! from one of the known PresentMon layouts, and then reused for every line.

use thiserror::Error;

/// PresentMon header with the PC latency column (32 columns).
pub const PRESENTMON_HEADER_PC_LATENCY: &str = "Application,ProcessID,SwapChainAddress,PresentRuntime,SyncInterval,PresentFlags,AllowsTearing,PresentMode,TimeInSeconds,MsBetweenSimulationStart,MsBetweenPresents,MsBetweenDisplayChange,MsInPresentAPI,MsRenderPresentLatency,MsUntilDisplayed,MsPCLatency,CPUStartQPCTimeInMs,MsBetweenAppStart,MsCPUBusy,MsCPUWait,MsGPULatency,MsGPUTime,MsGPUBusy,MsGPUWait,MsAnimationError,AnimationTime,MsFlipDelay,EtwBufferFillPct,EtwBuffersInUse,EtwTotalBuffers,EtwEventsLost,EtwBuffersLost";

/// PresentMon header without the PC latency column (31 columns).
pub const PRESENTMON_HEADER: &str = "Application,ProcessID,SwapChainAddress,PresentRuntime,SyncInterval,PresentFlags,AllowsTearing,PresentMode,TimeInSeconds,MsBetweenSimulationStart,MsBetweenPresents,MsBetweenDisplayChange,MsInPresentAPI,MsRenderPresentLatency,MsUntilDisplayed,CPUStartQPCTimeInMs,MsBetweenAppStart,MsCPUBusy,MsCPUWait,MsGPULatency,MsGPUTime,MsGPUBusy,MsGPUWait,MsAnimationError,AnimationTime,MsFlipDelay,EtwBufferFillPct,EtwBuffersInUse,EtwTotalBuffers,EtwEventsLost,EtwBuffersLost";

const APPLICATION: &str = "Application";
const PROCESS_ID: &str = "ProcessID";
const ELAPSED: &str = "CPUStartQPCTimeInMs";
const FRAME_TIME: &str = "MsBetweenPresents";
const SWAP_CHAIN: &str = "SwapChainAddress";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("probe header has no {0} column")]
    MissingColumn(&'static str),
}

/// Where each field we read lives in a split line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnIndices {
    pub application: usize,
    pub process_id: usize,
    pub elapsed: usize,
    pub frame_time: usize,
    pub swap_chain: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSchema {
    /// Lines with any other field count are rejected.
    pub field_count: usize,
    pub delimiter: char,
    /// Application value the probe writes for frames it could not attribute.
    pub error_token: String,
    /// Stripped from the application name.
    pub process_suffix: String,
    /// Multiplier taking the elapsed column to seconds.
    pub elapsed_scale: f64,
    pub columns: ColumnIndices,
}

impl ProbeSchema {
    /// One of the two layouts the supported PresentMon builds emit.
    pub fn presentmon(pc_latency: bool) -> Self {
        let (field_count, elapsed) = if pc_latency { (32, 16) } else { (31, 15) };
        Self {
            field_count,
            delimiter: ',',
            error_token: "<error>".to_string(),
            process_suffix: ".exe".to_string(),
            elapsed_scale: 1e-3,
            columns: ColumnIndices {
                application: 0,
                process_id: 1,
                elapsed,
                frame_time: 10,
                swap_chain: Some(2),
            },
        }
    }

    /// Build the index table from a header line.
    pub fn from_header(header: &str) -> Result<Self, SchemaError> {
        let names: Vec<&str> = header.trim().split(',').map(str::trim).collect();
        let find = |name: &'static str| {
            names
                .iter()
                .position(|n| *n == name)
                .ok_or(SchemaError::MissingColumn(name))
        };

        let columns = ColumnIndices {
            application: find(APPLICATION)?,
            process_id: find(PROCESS_ID)?,
            elapsed: find(ELAPSED)?,
            frame_time: find(FRAME_TIME)?,
            swap_chain: find(SWAP_CHAIN).ok(),
        };

        Ok(Self {
            field_count: names.len(),
            columns,
            ..Self::presentmon(false)
        })
    }

    /// True for the probe's column header rather than a frame line.
    pub fn is_header(&self, line: &str) -> bool {
        line.split(self.delimiter)
            .nth(self.columns.application)
            .map(|field| field.trim() == APPLICATION)
            .unwrap_or(false)
    }
}

impl Default for ProbeSchema {
    fn default() -> Self {
        Self::presentmon(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_matches_builtin_layouts() {
        assert_eq!(
            ProbeSchema::from_header(PRESENTMON_HEADER).unwrap(),
            ProbeSchema::presentmon(false)
        );
        assert_eq!(
            ProbeSchema::from_header(PRESENTMON_HEADER_PC_LATENCY).unwrap(),
            ProbeSchema::presentmon(true)
        );
    }

    #[test]
    fn test_reordered_header() {
        let schema =
            ProbeSchema::from_header("ProcessID,MsBetweenPresents,Application,CPUStartQPCTimeInMs")
                .unwrap();
        assert_eq!(schema.field_count, 4);
        assert_eq!(schema.columns.application, 2);
        assert_eq!(schema.columns.process_id, 0);
        assert_eq!(schema.columns.frame_time, 1);
        assert_eq!(schema.columns.elapsed, 3);
        assert_eq!(schema.columns.swap_chain, None);
    }

    #[test]
    fn test_header_missing_frame_time() {
        let err = ProbeSchema::from_header("Application,ProcessID,CPUStartQPCTimeInMs").unwrap_err();
        assert_eq!(err, SchemaError::MissingColumn("MsBetweenPresents"));
    }

    #[test]
    fn test_is_header() {
        let schema = ProbeSchema::presentmon(true);
        assert!(schema.is_header(PRESENTMON_HEADER_PC_LATENCY));
        assert!(!schema.is_header("game.exe,1234,0x1"));
    }
}
