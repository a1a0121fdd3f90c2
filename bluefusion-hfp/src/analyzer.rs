use crate::features::Codec;
use crate::session::{AtCommand, Direction, HfpSession, State};

/// One flattened trace entry, relative to the first command observed.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub relative_seconds: f64,
    pub command: String,
    pub direction: Direction,
    pub state: State,
}

#[derive(Debug, Clone)]
pub struct FailureReport {
    pub last_state: State,
    pub total_commands: usize,
    pub selected_codec: Codec,
    pub issues: Vec<String>,
    pub recent_trace: Vec<TraceEntry>,
}

const SLOW_RESPONSE_THRESHOLD_SECS: f64 = 1.0;
const RECENT_TRACE_LEN: usize = 10;

/// Pure function over a session's trace: diagnoses likely reasons
/// an HFP connection stalled.
pub fn analyze(session: &HfpSession) -> FailureReport {
    let trace: Vec<&AtCommand> = session.trace().iter().collect();
    let mut issues = Vec::new();

    match session.state {
        State::SlcConnecting => {
            issues.push("Service Level Connection failed".to_string());
            let codec_negotiated = session.hf_features.codec_negotiation && session.ag_features.codec_negotiation;
            let saw_bcs = trace.iter().any(|c| c.command.starts_with("+BCS"));
            if codec_negotiated && !saw_bcs {
                issues.push("Codec negotiation incomplete".to_string());
            }
        }
        State::AudioConnecting => {
            issues.push("SCO audio connection failed".to_string());
            if session.supported_codecs.contains(&Codec::MSbc) && session.selected_codec == Codec::Cvsd {
                issues.push("mSBC available but not selected".to_string());
            }
        }
        _ => {}
    }

    if trace.len() > 1 {
        let mut delays = Vec::with_capacity(trace.len() - 1);
        for pair in trace.windows(2) {
            let delay = (pair[1].wall_clock - pair[0].wall_clock).num_milliseconds() as f64 / 1000.0;
            delays.push(delay);
        }
        let avg_delay = delays.iter().sum::<f64>() / delays.len() as f64;
        if avg_delay > SLOW_RESPONSE_THRESHOLD_SECS {
            issues.push(format!("Slow command response (avg: {avg_delay:.2}s)"));
        }
    }

    let first_ts = trace.first().map(|c| c.wall_clock);
    let recent_trace = trace
        .iter()
        .rev()
        .take(RECENT_TRACE_LEN)
        .rev()
        .map(|c| TraceEntry {
            relative_seconds: first_ts
                .map(|first| (c.wall_clock - first).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0),
            command: c.command.clone(),
            direction: c.direction,
            state: c.state_after,
        })
        .collect();

    FailureReport {
        last_state: session.state,
        total_commands: trace.len(),
        selected_codec: session.selected_codec,
        issues,
        recent_trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Event, Role};
    use chrono::Utc;

    fn evt(command: &str, direction: Direction) -> Event {
        Event { command: command.to_string(), response: String::new(), direction, wall_clock: Utc::now() }
    }

    #[test]
    fn stuck_in_slc_connecting_with_codec_negotiation_claimed() {
        let mut session = HfpSession::new(Role::Hf);
        session.handle_event(evt("AT+BRSF=0x80", Direction::Tx));
        session.handle_event(evt("+BRSF:0x200", Direction::Rx));
        session.handle_event(evt("AT+BAC=1,2", Direction::Tx));
        session.handle_event(evt("AT+CIND=?", Direction::Tx));
        session.handle_event(evt(
            "+CIND: (\"call\",(0,1)),(\"callsetup\",(0-3))",
            Direction::Rx,
        ));

        let report = analyze(&session);
        assert_eq!(report.last_state, State::SlcConnecting);
        assert!(report.issues.contains(&"Service Level Connection failed".to_string()));
        assert!(report.issues.contains(&"Codec negotiation incomplete".to_string()));
    }

    #[test]
    fn stall_after_cmer_then_bcc_reports_audio_connecting_issue() {
        let mut session = HfpSession::new(Role::Hf);
        session.handle_event(evt("AT+BRSF=0x80", Direction::Tx));
        session.handle_event(evt("+BRSF:0x200", Direction::Rx));
        session.handle_event(evt("AT+BAC=1,2", Direction::Tx));
        session.handle_event(evt("+BAC:1,2", Direction::Rx));
        session.handle_event(evt("AT+CMER=3,0,0,1", Direction::Tx));
        assert_eq!(session.state, State::Connected);

        session.handle_event(evt("AT+BCC", Direction::Tx));
        assert_eq!(session.state, State::AudioConnecting);

        let report = analyze(&session);
        assert!(report.issues.contains(&"SCO audio connection failed".to_string()));
    }

    #[test]
    fn connected_state_with_no_bcc_reports_no_issues() {
        let mut session = HfpSession::new(Role::Hf);
        session.handle_event(evt("AT+BRSF=0x80", Direction::Tx));
        session.handle_event(evt("+BRSF:0x200", Direction::Rx));
        session.handle_event(evt("AT+BAC=1,2", Direction::Tx));
        session.handle_event(evt("AT+CIND=?", Direction::Tx));
        session.handle_event(evt(
            "+CIND: (\"call\",(0,1)),(\"callsetup\",(0-3))",
            Direction::Rx,
        ));
        session.handle_event(evt("AT+CMER=3,0,0,1", Direction::Tx));

        let report = analyze(&session);
        assert_eq!(report.last_state, State::Connected);
        assert!(report.issues.is_empty());
        assert_eq!(report.selected_codec, Codec::Cvsd);
    }
}
