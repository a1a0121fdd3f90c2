use std::collections::HashMap;

use thiserror::Error;

/// A single decoded field's value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedValue {
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

pub type ParsedFields = HashMap<String, ParsedValue>;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload too short to decode as {0}")]
    TooShort(&'static str),
    #[error("unrecognized opcode {0:#04x}")]
    UnknownOpcode(u8),
}

/// A protocol decoder registered under a tag ("ATT", "L2CAP_ATT", …).
pub trait ProtocolParser: Send + Sync {
    fn tag(&self) -> &'static str;
    fn can_parse(&self, bytes: &[u8]) -> bool;
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFields, ParseError>;
}

/// Dispatch table from protocol tag to parser.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: HashMap<&'static str, Box<dyn ProtocolParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        ParserRegistry { parsers: HashMap::new() }
    }

    /// A registry preloaded with the built-in ATT and L2CAP-ATT parsers.
    pub fn with_defaults() -> Self {
        let mut registry = ParserRegistry::new();
        registry.register(Box::new(AttParser));
        registry.register(Box::new(L2capAttParser));
        registry
    }

    pub fn register(&mut self, parser: Box<dyn ProtocolParser>) {
        self.parsers.insert(parser.tag(), parser);
    }

    pub fn get(&self, tag: &str) -> Option<&dyn ProtocolParser> {
        self.parsers.get(tag).map(|p| p.as_ref())
    }

    pub fn parse(&self, tag: &str, bytes: &[u8]) -> Option<Result<ParsedFields, ParseError>> {
        self.get(tag).map(|parser| parser.parse(bytes))
    }
}

fn att_error_name(code: u8) -> &'static str {
    match code {
        0x01 => "invalid_handle",
        0x02 => "read_not_permitted",
        0x03 => "write_not_permitted",
        0x04 => "invalid_pdu",
        0x05 => "insufficient_authentication",
        0x06 => "request_not_supported",
        0x07 => "invalid_offset",
        0x08 => "insufficient_authorization",
        0x09 => "prepare_queue_full",
        0x0A => "attribute_not_found",
        0x0B => "attribute_not_long",
        0x0C => "insufficient_encryption_key_size",
        0x0D => "invalid_attribute_value_length",
        0x0E => "unlikely_error",
        0x0F => "insufficient_encryption",
        0x10 => "unsupported_group_type",
        0x11 => "insufficient_resources",
        _ => "unknown",
    }
}

fn att_opcode_name(opcode: u8) -> Option<&'static str> {
    Some(match opcode {
        0x01 => "error_response",
        0x02 => "exchange_mtu_request",
        0x03 => "exchange_mtu_response",
        0x04 => "find_information_request",
        0x05 => "find_information_response",
        0x06 => "find_by_type_value_request",
        0x07 => "find_by_type_value_response",
        0x08 => "read_by_type_request",
        0x09 => "read_by_type_response",
        0x0A => "read_request",
        0x0B => "read_response",
        0x0C => "read_blob_request",
        0x0D => "read_blob_response",
        0x0E => "read_multiple_request",
        0x0F => "read_multiple_response",
        0x10 => "read_by_group_type_request",
        0x11 => "read_by_group_type_response",
        0x12 => "write_request",
        0x13 => "write_response",
        0x16 => "prepare_write_request",
        0x17 => "prepare_write_response",
        0x18 => "execute_write_request",
        0x19 => "execute_write_response",
        0x1B => "handle_value_notification",
        0x1D => "handle_value_indication",
        0x1E => "handle_value_confirmation",
        0x52 => "write_command",
        0xD2 => "signed_write_command",
        _ => return None,
    })
}

/// Built-in decoder for the full ATT opcode set.
pub struct AttParser;

impl ProtocolParser for AttParser {
    fn tag(&self) -> &'static str {
        "ATT"
    }

    fn can_parse(&self, bytes: &[u8]) -> bool {
        bytes.first().map(|&op| att_opcode_name(op).is_some()).unwrap_or(false)
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedFields, ParseError> {
        let opcode = *bytes.first().ok_or(ParseError::TooShort("ATT"))?;
        let name = att_opcode_name(opcode).ok_or(ParseError::UnknownOpcode(opcode))?;

        let mut fields = ParsedFields::new();
        fields.insert("opcode".into(), ParsedValue::Int(opcode as i64));
        fields.insert("opcode_name".into(), ParsedValue::Text(name.to_string()));

        match opcode {
            0x01 => {
                if bytes.len() < 5 {
                    return Err(ParseError::TooShort("ATT error response"));
                }
                let request_opcode = bytes[1];
                let handle = u16::from_le_bytes([bytes[2], bytes[3]]);
                let error_code = bytes[4];
                fields.insert("request_opcode".into(), ParsedValue::Int(request_opcode as i64));
                fields.insert("handle".into(), ParsedValue::Int(handle as i64));
                fields.insert("error_code".into(), ParsedValue::Int(error_code as i64));
                fields.insert("error_name".into(), ParsedValue::Text(att_error_name(error_code).to_string()));
            }
            0x0A | 0x0C | 0x12 | 0x1B | 0x1D => {
                if bytes.len() >= 3 {
                    let handle = u16::from_le_bytes([bytes[1], bytes[2]]);
                    fields.insert("handle".into(), ParsedValue::Int(handle as i64));
                }
                if bytes.len() > 3 {
                    fields.insert("value".into(), ParsedValue::Bytes(bytes[3..].to_vec()));
                }
            }
            0x02 => {
                if bytes.len() >= 3 {
                    let mtu = u16::from_le_bytes([bytes[1], bytes[2]]);
                    fields.insert("client_rx_mtu".into(), ParsedValue::Int(mtu as i64));
                }
            }
            0x03 => {
                if bytes.len() >= 3 {
                    let mtu = u16::from_le_bytes([bytes[1], bytes[2]]);
                    fields.insert("server_rx_mtu".into(), ParsedValue::Int(mtu as i64));
                }
            }
            _ => {
                if bytes.len() > 1 {
                    fields.insert("raw".into(), ParsedValue::Bytes(bytes[1..].to_vec()));
                }
            }
        }

        Ok(fields)
    }
}

/// Decoder for ATT PDUs carried over an L2CAP fixed channel: strips the
/// 4-byte L2CAP basic header (length + CID) and delegates to [`AttParser`].
pub struct L2capAttParser;

impl ProtocolParser for L2capAttParser {
    fn tag(&self) -> &'static str {
        "L2CAP_ATT"
    }

    fn can_parse(&self, bytes: &[u8]) -> bool {
        bytes.len() > 4 && AttParser.can_parse(&bytes[4..])
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedFields, ParseError> {
        if bytes.len() < 4 {
            return Err(ParseError::TooShort("L2CAP_ATT"));
        }
        AttParser.parse(&bytes[4..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_error_response_with_named_error_code() {
        let bytes = [0x01, 0x0A, 0x05, 0x00, 0x05];
        let fields = AttParser.parse(&bytes).unwrap();
        assert_eq!(fields.get("error_name"), Some(&ParsedValue::Text("insufficient_authentication".to_string())));
        assert_eq!(fields.get("handle"), Some(&ParsedValue::Int(5)));
    }

    #[test]
    fn decodes_write_request_handle_and_value() {
        let bytes = [0x12, 0x01, 0x00, 0xDE, 0xAD];
        let fields = AttParser.parse(&bytes).unwrap();
        assert_eq!(fields.get("handle"), Some(&ParsedValue::Int(1)));
        assert_eq!(fields.get("value"), Some(&ParsedValue::Bytes(vec![0xDE, 0xAD])));
    }

    #[test]
    fn rejects_unknown_opcode() {
        assert!(matches!(AttParser.parse(&[0xFF]), Err(ParseError::UnknownOpcode(0xFF))));
    }

    #[test]
    fn registry_dispatches_by_tag() {
        let registry = ParserRegistry::with_defaults();
        let result = registry.parse("ATT", &[0x0A, 0x01, 0x00]).unwrap().unwrap();
        assert_eq!(result.get("opcode_name"), Some(&ParsedValue::Text("read_request".to_string())));
    }

    #[test]
    fn l2cap_att_parser_strips_header_before_delegating() {
        let bytes = [0x03, 0x00, 0x04, 0x00, 0x0A, 0x01, 0x00];
        let fields = L2capAttParser.parse(&bytes).unwrap();
        assert_eq!(fields.get("opcode_name"), Some(&ParsedValue::Text("read_request".to_string())));
        assert_eq!(fields.get("handle"), Some(&ParsedValue::Int(1)));
    }

    #[test]
    fn registry_dispatches_l2cap_att_tag() {
        let registry = ParserRegistry::with_defaults();
        let bytes = [0x03, 0x00, 0x04, 0x00, 0x12, 0x01, 0x00, 0xDE, 0xAD];
        let result = registry.parse("L2CAP_ATT", &bytes).unwrap().unwrap();
        assert_eq!(result.get("value"), Some(&ParsedValue::Bytes(vec![0xDE, 0xAD])));
    }
}
