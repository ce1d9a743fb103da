use std::time::Duration;

use zippon_loadgen::{
    run_load, ChannelConfig, ChannelError, LoadObserver, LoadPlan, RecordGenerator, Response,
    SessionReport,
};

fn plan(mode: &str, sessions: usize, records_per_session: usize) -> LoadPlan {
    LoadPlan {
        sessions,
        records_per_session,
        seed: Some(42),
        channel: ChannelConfig::new(env!("CARGO_BIN_EXE_zippon_stub"))
            .with_args([mode])
            .with_response_timeout(Duration::from_secs(10))
            .with_shutdown_grace(Duration::from_secs(5)),
    }
}

#[derive(Default)]
struct Recorder {
    responses: Vec<(usize, usize, Response)>,
    sessions: Vec<SessionReport>,
}

impl LoadObserver for Recorder {
    fn on_response(&mut self, session: usize, request: usize, response: &Response) {
        self.responses.push((session, request, response.clone()));
    }

    fn on_session_end(&mut self, report: &SessionReport) {
        self.sessions.push(report.clone());
    }
}

#[test]
fn echoed_load_replays_the_seeded_command_stream() {
    let mut recorder = Recorder::default();
    let report = run_load(&plan("echo", 3, 4), &mut recorder).expect("load");

    assert_eq!(report.total_requests, 12);
    assert_eq!(report.truncated_responses, 0);
    assert_eq!(report.sessions.len(), 3);
    assert_eq!(recorder.sessions, report.sessions);

    // One generator spans all sessions, so the echoes are the seeded stream.
    let expected: Vec<String> = RecordGenerator::seeded(42).take(12).collect();
    let echoed: Vec<String> = recorder.responses.iter().map(|(_, _, r)| r.text.clone()).collect();
    assert_eq!(echoed, expected);

    let bytes: usize = expected.iter().map(String::len).sum();
    assert_eq!(report.total_response_bytes, bytes);

    for (i, session) in report.sessions.iter().enumerate() {
        assert_eq!(session.index, i);
        assert_eq!(session.requests, 4);
        assert_eq!(session.exit_code, Some(0));
    }
}

#[test]
fn truncated_sessions_are_counted() {
    // The stub answers each session's only request partially, then exits.
    let result = run_load(&plan("truncate", 2, 1), &mut ());
    let report = result.expect("load");
    assert_eq!(report.total_requests, 2);
    assert_eq!(report.truncated_responses, 2);
}

#[test]
fn silent_collaborator_fails_the_run_with_a_timeout() {
    let mut plan = plan("silent", 2, 2);
    plan.channel = plan
        .channel
        .with_response_timeout(Duration::from_millis(150))
        .with_shutdown_grace(Duration::from_millis(50));

    let mut recorder = Recorder::default();
    let err = run_load(&plan, &mut recorder).unwrap_err();
    assert!(matches!(err, ChannelError::Timeout(_)), "{err}");
    assert!(recorder.sessions.is_empty());
}

#[test]
fn report_serializes_to_versioned_json() {
    let report = run_load(&plan("ok", 1, 2), &mut ()).expect("load");
    let json = serde_json::to_value(&report).expect("json");
    assert_eq!(json["version"], "zippon_loadgen_report_v1");
    assert_eq!(json["total_requests"], 2);
    assert_eq!(json["sessions"][0]["response_bytes"], 4);
}
