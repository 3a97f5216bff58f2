//! Sessions rebuilt from a recorded probe log.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use super::session::Session;
use crate::frame;
use crate::schema::ProbeSchema;

#[derive(Debug)]
pub struct ReplayedLog {
    /// One sealed session per pid, ordered by pid.
    pub sessions: Vec<Session>,
    /// Lines that did not parse.
    pub skipped: usize,
}

/// Split a probe log into per-process sessions. Header lines renegotiate the
/// schema; malformed lines are counted and skipped.
pub fn sessions_from_log(log: &str, schema: ProbeSchema) -> ReplayedLog {
    let mut schema = schema;
    let mut by_pid: BTreeMap<u32, Session> = BTreeMap::new();
    let mut skipped = 0;

    for line in log.lines().filter(|l| !l.trim().is_empty()) {
        if schema.is_header(line) {
            if let Ok(negotiated) = ProbeSchema::from_header(line) {
                debug!(fields = negotiated.field_count, "schema negotiated from log header");
                schema = negotiated;
            }
            continue;
        }
        match frame::parse(line, &schema) {
            Ok(sample) => {
                by_pid
                    .entry(sample.pid)
                    .or_insert_with(|| Session::for_process(&sample.process_name, sample.pid))
                    .append(&sample);
            }
            Err(e) => {
                trace!("skipping log line: {}", e);
                skipped += 1;
            }
        }
    }

    let sessions = by_pid
        .into_values()
        .map(|mut session| {
            session.seal(None);
            session
        })
        .collect();
    ReplayedLog { sessions, skipped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::presentmon_line;
    use crate::schema::PRESENTMON_HEADER;

    #[test]
    fn test_log_split_by_process() {
        let log = [
            PRESENTMON_HEADER.to_string(),
            presentmon_line("game.exe", 20, 1000.0, 16.0),
            presentmon_line("dwm.exe", 4, 1001.0, 8.0),
            "truncated,line".to_string(),
            presentmon_line("game.exe", 20, 1016.0, 16.0),
            String::new(),
        ]
        .join("\n");

        let replay = sessions_from_log(&log, ProbeSchema::presentmon(true));
        assert_eq!(replay.skipped, 1);
        assert_eq!(replay.sessions.len(), 2);

        let dwm = &replay.sessions[0];
        assert_eq!((dwm.process_name.as_str(), dwm.len()), ("dwm", 1));
        let game = &replay.sessions[1];
        assert_eq!(game.frametimes(), vec![16.0, 16.0]);
        assert_eq!(game.samples[0].timestamp_seconds, 0.0);
        assert!(game.is_sealed());
    }
}
