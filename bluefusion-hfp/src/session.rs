use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::features::{AgFeatures, Codec, HfFeatures};

const DEFAULT_TRACE_CAPACITY: usize = 1000;

/// Parses a `BRSF` feature mask, accepting both the plain decimal real
/// devices send and a `0x`/`0X`-prefixed hex literal.
fn parse_mask(s: &str) -> Option<u32> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse::<u32>().ok(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Hf,
    Ag,
}

/// HFP service-level/audio connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    SlcConnecting,
    Connected,
    AudioConnecting,
    AudioConnected,
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

/// One entry in the AT-command trace ring.
#[derive(Debug, Clone)]
pub struct AtCommand {
    pub wall_clock: DateTime<Utc>,
    pub command: String,
    pub response: String,
    pub direction: Direction,
    pub state_after: State,
}

/// An inbound or outbound AT-command event fed to `HfpSession::handle_event`.
#[derive(Debug, Clone)]
pub struct Event {
    pub command: String,
    pub response: String,
    pub direction: Direction,
    pub wall_clock: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Indicator {
    pub range: String,
    pub value: i32,
}

#[derive(Debug, Clone, Default)]
pub struct CallState {
    pub active: bool,
    pub incoming: bool,
    pub outgoing: bool,
    pub number: Option<String>,
}

/// Single-task-owned HFP state machine, driven by a stream of
/// `(command, response, direction, wall_clock)` events.
pub struct HfpSession {
    pub role: Role,
    pub state: State,
    pub hf_features: HfFeatures,
    pub ag_features: AgFeatures,
    pub supported_codecs: Vec<Codec>,
    pub selected_codec: Codec,
    pub indicators: Vec<(String, Indicator)>,
    pub call_state: CallState,
    trace: VecDeque<AtCommand>,
    trace_capacity: usize,
}

impl HfpSession {
    pub fn new(role: Role) -> Self {
        HfpSession::with_trace_capacity(role, DEFAULT_TRACE_CAPACITY)
    }

    pub fn with_trace_capacity(role: Role, trace_capacity: usize) -> Self {
        HfpSession {
            role,
            state: State::Disconnected,
            hf_features: HfFeatures::default(),
            ag_features: AgFeatures::default(),
            supported_codecs: vec![Codec::Cvsd],
            selected_codec: Codec::Cvsd,
            indicators: Vec::new(),
            call_state: CallState::default(),
            trace: VecDeque::new(),
            trace_capacity,
        }
    }

    pub fn trace(&self) -> &VecDeque<AtCommand> {
        &self.trace
    }

    pub fn handle_event(&mut self, event: Event) {
        match event.direction {
            Direction::Tx => self.handle_outgoing(&event.command),
            Direction::Rx => self.handle_incoming(&event.command),
        }

        self.push_trace(AtCommand {
            wall_clock: event.wall_clock,
            command: event.command,
            response: event.response,
            direction: event.direction,
            state_after: self.state,
        });
    }

    fn push_trace(&mut self, entry: AtCommand) {
        if self.trace.len() == self.trace_capacity {
            self.trace.pop_front();
        }
        self.trace.push_back(entry);
    }

    fn handle_outgoing(&mut self, command: &str) {
        let command = command.trim();
        if let Some(mask) = command.strip_prefix("AT+BRSF=") {
            if let Some(mask) = parse_mask(mask.trim()) {
                self.hf_features = HfFeatures::from_bitmask(mask);
            }
            self.state = State::SlcConnecting;
        } else if command.starts_with("AT+BAC") {
            self.state = State::SlcConnecting;
        } else if command == "AT+CIND=?" || command == "AT+CIND?" {
            // Indicator query/read; no state transition.
        } else if command.starts_with("AT+CMER") {
            self.state = State::Connected;
        } else if command.starts_with("AT+BCC") {
            self.state = State::AudioConnecting;
        }
    }

    fn handle_incoming(&mut self, command: &str) {
        let command = command.trim();
        if let Some(rest) = command.strip_prefix("+BRSF:") {
            if let Some(mask) = parse_mask(rest.trim()) {
                self.ag_features = AgFeatures::from_bitmask(mask);
            }
        } else if let Some(rest) = command.strip_prefix("+BAC:") {
            self.supported_codecs =
                rest.split(',').filter_map(Codec::from_bac_digit).collect();
            if self.supported_codecs.is_empty() {
                self.supported_codecs.push(Codec::Cvsd);
            }
        } else if let Some(rest) = command.strip_prefix("+BCS:") {
            if let Ok(id) = rest.trim().parse::<u32>() {
                self.selected_codec = Codec::from_bcs_id(id);
                self.state = State::AudioConnected;
            }
        } else if let Some(rest) = command.strip_prefix("+CIND:") {
            self.parse_indicators(rest);
        } else if let Some(rest) = command.strip_prefix("+CIEV:") {
            self.handle_indicator_event(rest);
        }
    }

    /// `+CIND: ("call",(0,1)),("callsetup",(0-3)),...`.
    fn parse_indicators(&mut self, body: &str) {
        self.indicators.clear();
        let mut rest = body;
        while let Some(name_start) = rest.find('"') {
            let after_quote = &rest[name_start + 1..];
            let Some(name_end) = after_quote.find('"') else { break };
            let name = after_quote[..name_end].to_string();

            let after_name = &after_quote[name_end + 1..];
            let Some(paren_start) = after_name.find('(') else { break };
            let Some(paren_end) = after_name.find(')') else { break };
            if paren_end < paren_start {
                break;
            }
            let range = after_name[paren_start + 1..paren_end].to_string();

            self.indicators.push((name, Indicator { range, value: 0 }));
            rest = &after_name[paren_end + 1..];
        }
    }

    /// `+CIEV:<1-based index>,<value>`.
    fn handle_indicator_event(&mut self, body: &str) {
        let mut parts = body.split(',');
        let (Some(idx), Some(value)) = (parts.next(), parts.next()) else { return };
        let (Ok(idx), Ok(value)) = (idx.trim().parse::<usize>(), value.trim().parse::<i32>()) else {
            return;
        };
        if idx == 0 || idx > self.indicators.len() {
            return;
        }
        let (name, indicator) = &mut self.indicators[idx - 1];
        indicator.value = value;

        match name.as_str() {
            "call" => self.call_state.active = value == 1,
            "callsetup" => {
                self.call_state.incoming = value == 1;
                self.call_state.outgoing = value == 2;
            }
            _ => {}
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn evt(command: &str, direction: Direction) -> Event {
        Event { command: command.to_string(), response: String::new(), direction, wall_clock: Utc::now() }
    }

    #[test]
    fn brsf_exchange_enters_slc_connecting() {
        let mut session = HfpSession::new(Role::Hf);
        session.handle_event(evt("AT+BRSF=128", Direction::Tx));
        assert_eq!(session.state, State::SlcConnecting);
        assert!(session.hf_features.codec_negotiation);
    }

    #[test]
    fn brsf_mask_accepts_hex_literal() {
        let mut session = HfpSession::new(Role::Hf);
        session.handle_event(evt("AT+BRSF=0x80", Direction::Tx));
        session.handle_event(evt("+BRSF:0x200", Direction::Rx));
        assert!(session.hf_features.codec_negotiation);
        assert!(session.ag_features.codec_negotiation);
    }

    #[test]
    fn codec_selection_via_bcs_reaches_audio_connected() {
        let mut session = HfpSession::new(Role::Hf);
        session.handle_event(evt("+BAC:1,2", Direction::Rx));
        assert_eq!(session.supported_codecs, vec![Codec::Cvsd, Codec::MSbc]);

        session.handle_event(evt("+BCS:2", Direction::Rx));
        assert_eq!(session.selected_codec, Codec::MSbc);
        assert_eq!(session.state, State::AudioConnected);
    }

    #[test]
    fn cind_and_ciev_update_call_state() {
        let mut session = HfpSession::new(Role::Hf);
        session.handle_event(evt(
            "+CIND: (\"call\",(0,1)),(\"callsetup\",(0-3))",
            Direction::Rx,
        ));
        assert_eq!(session.indicators.len(), 2);

        session.handle_event(evt("+CIEV:1,1", Direction::Rx));
        assert!(session.call_state.active);

        session.handle_event(evt("+CIEV:2,2", Direction::Rx));
        assert!(session.call_state.outgoing);
    }

    #[test]
    fn trace_ring_respects_capacity() {
        let mut session = HfpSession::with_trace_capacity(Role::Hf, 2);
        session.handle_event(evt("AT+CIND=?", Direction::Tx));
        session.handle_event(evt("AT+CIND?", Direction::Tx));
        session.handle_event(evt("AT+CMER=3,0,0,1", Direction::Tx));

        assert_eq!(session.trace().len(), 2);
        assert_eq!(session.trace().front().unwrap().command, "AT+CIND?");
    }
}
