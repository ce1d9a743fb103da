//! Session loop: spawn, push `records_per_session` commands, close, repeat.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::channel::{with_session, ChannelConfig, Response};
use crate::error::ChannelError;
use crate::record::RecordGenerator;

pub const REPORT_VERSION: &str = "zippon_loadgen_report_v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoadPlan {
    /// Number of independent process lifetimes.
    pub sessions: usize,
    pub records_per_session: usize,
    /// RNG seed (deterministic). `None` draws from OS entropy.
    pub seed: Option<u64>,
    pub channel: ChannelConfig,
}

impl Default for LoadPlan {
    fn default() -> Self {
        Self {
            sessions: 1000,
            records_per_session: 1000,
            seed: None,
            channel: ChannelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionReport {
    pub index: usize,
    pub pid: u32,
    pub requests: usize,
    /// Responses that ended without an ETX.
    pub truncated: usize,
    pub response_bytes: usize,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub version: String,
    pub program: String,
    pub seed: Option<u64>,
    pub total_requests: usize,
    pub truncated_responses: usize,
    pub total_response_bytes: usize,
    pub elapsed_ms: u64,
    pub sessions: Vec<SessionReport>,
}

/// Hooks for progress output. Both default to no-ops.
pub trait LoadObserver {
    fn on_response(&mut self, _session: usize, _request: usize, _response: &Response) {}

    fn on_session_end(&mut self, _report: &SessionReport) {}
}

impl LoadObserver for () {}

/// Drive every session of `plan` in order. The first channel error aborts the
/// run; the session it happened in is still closed.
pub fn run_load(
    plan: &LoadPlan,
    observer: &mut dyn LoadObserver,
) -> Result<LoadReport, ChannelError> {
    let mut generator = match plan.seed {
        Some(seed) => RecordGenerator::seeded(seed),
        None => RecordGenerator::from_entropy(),
    };
    let start = Instant::now();
    let mut sessions = Vec::with_capacity(plan.sessions);

    for index in 0..plan.sessions {
        let session_start = Instant::now();
        let ((pid, requests, truncated, response_bytes), status) =
            with_session(plan.channel.clone(), |session| {
                let mut truncated = 0;
                let mut response_bytes = 0;
                for request in 0..plan.records_per_session {
                    let command = generator.next_command();
                    let response = session.run_frame(&command)?;
                    if !response.complete {
                        truncated += 1;
                    }
                    response_bytes += response.text.len();
                    observer.on_response(index, request, &response);
                }
                Ok::<_, ChannelError>((
                    session.pid(),
                    plan.records_per_session,
                    truncated,
                    response_bytes,
                ))
            })?;

        let report = SessionReport {
            index,
            pid,
            requests,
            truncated,
            response_bytes,
            exit_code: status.code(),
            elapsed_ms: millis(session_start.elapsed()),
        };
        if report.truncated > 0 {
            tracing::warn!(
                session = index,
                pid,
                truncated = report.truncated,
                "collaborator closed its output mid-session"
            );
        }
        observer.on_session_end(&report);
        sessions.push(report);
    }

    Ok(LoadReport {
        version: REPORT_VERSION.to_string(),
        program: plan.channel.program.display().to_string(),
        seed: plan.seed,
        total_requests: sessions.iter().map(|s| s.requests).sum(),
        truncated_responses: sessions.iter().map(|s| s.truncated).sum(),
        total_response_bytes: sessions.iter().map(|s| s.response_bytes).sum(),
        elapsed_ms: millis(start.elapsed()),
        sessions,
    })
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
