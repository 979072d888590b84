//! External console wire format.
//!
//! Every packet is a frame (see [`FrameParser`]) with magic [`MAGIC`]
//! whose payload starts with an [`Opcode`] byte. Integers are little-endian
//! and strings are prefixed with their u32 byte length.

use bytes::BytesMut;

use crate::core::{Message, MessageInfo, MsgColor, Severity};
use crate::error::ProtocolError;
use crate::net::{FrameBuilder, FrameParser, FrameReader};

/// Frame magic.
pub const MAGIC: &[u8] = b"ECON01";

/// Largest payload either side accepts.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024;

/// Opcode, opcode + u32 count.
const CMD_LIST_HEADER: usize = 1 + 4;

/// Opcode, severity, color, time, two string lengths.
const PRINT_FIXED: usize = 1 + 1 + 1 + 8 + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Client to host: execute a command line.
    Command = 1,
    /// Either direction: ask the other side to take focus.
    RequestFocus = 51,
    /// Host to client: a console message.
    Print = 101,
    /// Host to client: names of registered items.
    CmdList = 102,
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Opcode::Command),
            51 => Ok(Opcode::RequestFocus),
            101 => Ok(Opcode::Print),
            102 => Ok(Opcode::CmdList),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// A parser configured for this protocol.
pub fn parser() -> FrameParser {
    FrameParser::new(MAGIC, MAX_PAYLOAD_SIZE)
}

fn begin(out: &mut BytesMut, opcode: Opcode) -> FrameBuilder<'_> {
    let mut frame = FrameBuilder::begin(out, MAGIC);
    frame.put_u8(opcode as u8);
    frame
}

/// Append a COMMAND packet.
pub fn encode_command(out: &mut BytesMut, command: &str) {
    let mut frame = begin(out, Opcode::Command);
    frame.put_str(truncate(command, MAX_PAYLOAD_SIZE - 1 - 4));
    frame.finish();
}

/// Append a REQUEST_FOCUS packet.
pub fn encode_request_focus(out: &mut BytesMut) {
    begin(out, Opcode::RequestFocus).finish();
}

/// Append a PRINT packet. Text that does not fit is truncated.
pub fn encode_print(out: &mut BytesMut, info: &MessageInfo, text: &str) {
    let tag = truncate(&info.tag, MAX_PAYLOAD_SIZE - PRINT_FIXED);
    let text = truncate(text, MAX_PAYLOAD_SIZE - PRINT_FIXED - tag.len());

    let mut frame = begin(out, Opcode::Print);
    frame.put_u8(info.severity as u8);
    frame.put_u8(info.color as u8);
    frame.put_i64(info.time);
    frame.put_str(tag);
    frame.put_str(text);
    frame.finish();
}

/// Append CMD_LIST packets for `names`, splitting them so that no payload
/// exceeds [`MAX_PAYLOAD_SIZE`]. A name too long for any packet is skipped.
/// Returns the number of packets written.
pub fn encode_cmd_list<S: AsRef<str>>(out: &mut BytesMut, names: &[S]) -> usize {
    let budget = MAX_PAYLOAD_SIZE - CMD_LIST_HEADER;
    let mut packets = 0;
    let mut rest = names;

    while !rest.is_empty() {
        let mut size = 0;
        let mut count = 0;
        for name in rest {
            let entry = 4 + name.as_ref().len();
            if size + entry > budget {
                break;
            }
            size += entry;
            count += 1;
        }

        if count == 0 {
            rest = &rest[1..];
            continue;
        }

        let mut frame = begin(out, Opcode::CmdList);
        frame.put_u32(count as u32);
        for name in &rest[..count] {
            frame.put_str(name.as_ref());
        }
        frame.finish();

        packets += 1;
        rest = &rest[count..];
    }

    packets
}

/// Packet sent by a remote controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket<'a> {
    Command(&'a str),
    RequestFocus,
}

/// Packet sent by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPacket<'a> {
    Print(Message),
    CmdList(Vec<&'a str>),
    RequestFocus,
}

fn opcode(reader: &mut FrameReader<'_>) -> Result<Opcode, ProtocolError> {
    if reader.remaining() == 0 {
        return Err(ProtocolError::Empty);
    }
    Opcode::try_from(reader.get_u8()?)
}

/// Decode a payload received by the host.
pub fn decode_client(payload: &[u8]) -> Result<ClientPacket<'_>, ProtocolError> {
    let mut reader = FrameReader::new(payload);
    match opcode(&mut reader)? {
        Opcode::Command => Ok(ClientPacket::Command(reader.get_str()?)),
        Opcode::RequestFocus => Ok(ClientPacket::RequestFocus),
        other => Err(ProtocolError::UnknownOpcode(other as u8)),
    }
}

/// Decode a payload received by a remote controller.
pub fn decode_host(payload: &[u8]) -> Result<HostPacket<'_>, ProtocolError> {
    let mut reader = FrameReader::new(payload);
    match opcode(&mut reader)? {
        Opcode::Print => {
            let raw = reader.get_u8()?;
            let severity = Severity::from_u8(raw).ok_or(ProtocolError::InvalidValue {
                field: "severity",
                value: raw,
            })?;
            let raw = reader.get_u8()?;
            let color = MsgColor::from_u8(raw).ok_or(ProtocolError::InvalidValue { field: "color", value: raw })?;
            let time = reader.get_i64()?;
            let tag = reader.get_str()?.to_owned();
            let text = reader.get_str()?;

            let info = MessageInfo::new(severity).color(color).time(time).tag(tag);
            Ok(HostPacket::Print(Message::new(info, text)))
        }
        Opcode::CmdList => {
            let count = reader.get_u32()? as usize;
            // Each name takes at least its length prefix.
            if count > reader.remaining() / 4 {
                return Err(ProtocolError::Truncated);
            }
            let names = (0..count).map(|_| reader.get_str()).collect::<Result<_, _>>()?;
            Ok(HostPacket::CmdList(names))
        }
        Opcode::RequestFocus => Ok(HostPacket::RequestFocus),
        other => Err(ProtocolError::UnknownOpcode(other as u8)),
    }
}

/// Longest prefix of `s` that fits in `max` bytes and ends on a char
/// boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(stream: &[u8]) -> Vec<Vec<u8>> {
        let mut parser = parser();
        let mut out = Vec::new();
        parser.parse_data(stream, |p| out.push(p.to_vec())).unwrap();
        out
    }

    #[test]
    fn test_command_and_focus() {
        let mut buf = BytesMut::new();
        encode_command(&mut buf, "list cvar");
        encode_request_focus(&mut buf);

        let got = payloads(&buf);
        assert_eq!(got.len(), 2);
        assert_eq!(decode_client(&got[0]), Ok(ClientPacket::Command("list cvar")));
        assert_eq!(decode_client(&got[1]), Ok(ClientPacket::RequestFocus));
    }

    #[test]
    fn test_print_fields() {
        let info = MessageInfo::new(Severity::Warn)
            .color(MsgColor::BrightPurple)
            .time(1_700_000_000)
            .tag("net");

        let mut buf = BytesMut::new();
        encode_print(&mut buf, &info, "careful");

        let got = payloads(&buf);
        let HostPacket::Print(msg) = decode_host(&got[0]).unwrap() else {
            panic!("expected print");
        };
        assert_eq!(msg.info, info);
        assert_eq!(msg.text, "careful");
    }

    #[test]
    fn test_long_print_is_truncated_on_char_boundary() {
        let text = "é".repeat(MAX_PAYLOAD_SIZE);
        let mut buf = BytesMut::new();
        encode_print(&mut buf, &MessageInfo::default(), &text);

        let got = payloads(&buf);
        assert!(got[0].len() <= MAX_PAYLOAD_SIZE);
        let HostPacket::Print(msg) = decode_host(&got[0]).unwrap() else {
            panic!("expected print");
        };
        assert!(msg.text.chars().all(|c| c == 'é'));
        assert!(msg.text.len() > MAX_PAYLOAD_SIZE - 64);
    }

    #[test]
    fn test_cmd_list_split() {
        let names: Vec<String> = (0..2000).map(|i| format!("item_name_{i:05}")).collect();
        let mut buf = BytesMut::new();
        let packets = encode_cmd_list(&mut buf, &names);
        assert!(packets > 1);

        let mut decoded = Vec::new();
        for payload in payloads(&buf) {
            assert!(payload.len() <= MAX_PAYLOAD_SIZE);
            let HostPacket::CmdList(list) = decode_host(&payload).unwrap() else {
                panic!("expected cmd list");
            };
            decoded.extend(list.into_iter().map(str::to_owned));
        }
        assert_eq!(decoded, names);
    }

    #[test]
    fn test_cmd_list_skips_oversized_name() {
        let huge = "x".repeat(MAX_PAYLOAD_SIZE);
        let names = ["a", huge.as_str(), "b"];
        let mut buf = BytesMut::new();
        assert_eq!(encode_cmd_list(&mut buf, &names), 1);

        let got = payloads(&buf);
        assert_eq!(decode_host(&got[0]), Ok(HostPacket::CmdList(vec!["a", "b"])));

        let mut empty = BytesMut::new();
        assert_eq!(encode_cmd_list::<&str>(&mut empty, &[]), 0);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_client(&[]), Err(ProtocolError::Empty));
        assert_eq!(decode_client(&[7]), Err(ProtocolError::UnknownOpcode(7)));
        assert_eq!(decode_client(&[101]), Err(ProtocolError::UnknownOpcode(101)));
        assert_eq!(decode_client(&[1, 5, 0]), Err(ProtocolError::Truncated));
        assert_eq!(
            decode_host(&[101, 42, 0]),
            Err(ProtocolError::InvalidValue { field: "severity", value: 42 })
        );
        assert_eq!(decode_host(&[102, 0xff, 0xff, 0xff, 0xff]), Err(ProtocolError::Truncated));
    }
}
