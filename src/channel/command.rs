//! Camera command grammar.
//!
//! A command is an opcode such as `#G` optionally followed by a parenthesised,
//! comma-separated argument list: `#G(2)`, `#R(0,0,1024,1024)`, `#a`.

use std::fmt;

/// Byte the camera appends to acknowledge a command.
pub const ACK: char = '\u{06}';
/// Byte the camera sends to reject a command.
pub const NAK: char = '\u{15}';
/// Marker the camera prefixes replies with.
pub const REPLY_MARKER: char = '>';

/// Camera opcodes understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Analog gain step, `#G`.
    Gain,
    /// Fixed pattern noise correction on/off.
    FpnCorrection,
    /// Sensor black level.
    BlackLevel,
    /// Window position and size, `#R(x,y,w,h)`.
    FrameFormat,
    /// Frames per second.
    FrameRate,
    /// Exposure time in microseconds.
    Exposure,
    /// Dual-slope mode on/off.
    DualSlope,
    /// Dual-slope time.
    DualSlopeTime,
    /// Triple-slope mode on/off.
    TripleSlope,
    /// Triple-slope time.
    TripleSlopeTime,
    /// Query the longest exposure allowed at the current frame rate.
    MaxExposure,
    /// Query the highest frame rate allowed for the current window.
    MaxFrameRate,
}

impl Opcode {
    /// Every opcode, in no particular order.
    pub const ALL: [Opcode; 12] = [
        Opcode::Gain,
        Opcode::FpnCorrection,
        Opcode::BlackLevel,
        Opcode::FrameFormat,
        Opcode::FrameRate,
        Opcode::Exposure,
        Opcode::DualSlope,
        Opcode::DualSlopeTime,
        Opcode::TripleSlope,
        Opcode::TripleSlopeTime,
        Opcode::MaxExposure,
        Opcode::MaxFrameRate,
    ];

    /// Wire form of the opcode.
    pub fn code(self) -> &'static str {
        match self {
            Opcode::Gain => "#G",
            Opcode::FpnCorrection => "#F",
            Opcode::BlackLevel => "#z",
            Opcode::FrameFormat => "#R",
            Opcode::FrameRate => "#r",
            Opcode::Exposure => "#e",
            Opcode::DualSlope => "#D",
            Opcode::DualSlopeTime => "#d",
            Opcode::TripleSlope => "#T",
            Opcode::TripleSlopeTime => "#t",
            Opcode::MaxExposure => "#a",
            Opcode::MaxFrameRate => "#A",
        }
    }

    /// Inverse of [`Opcode::code`]. Opcodes are case sensitive.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.code() == code)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A single camera command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    args: Vec<String>,
}

impl Command {
    /// Command with no arguments yet.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            args: Vec::new(),
        }
    }

    /// Append one argument, formatted with `Display`.
    pub fn arg(mut self, value: impl fmt::Display) -> Self {
        self.args.push(value.to_string());
        self
    }

    /// Shorthand for a set-command with a single argument.
    pub fn set(opcode: Opcode, value: impl fmt::Display) -> Self {
        Self::new(opcode).arg(value)
    }

    /// `#R(x,y,w,h)`.
    pub fn frame_format(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self::new(Opcode::FrameFormat)
            .arg(x)
            .arg(y)
            .arg(width)
            .arg(height)
    }

    /// Opcode this command sends.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Arguments in wire order.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Parse the wire form back into a command.
    ///
    /// Used by the simulated camera; returns `None` for unknown opcodes or
    /// unbalanced parentheses.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (code, rest) = match line.find('(') {
            Some(open) => (&line[..open], Some(&line[open + 1..])),
            None => (line, None),
        };
        let opcode = Opcode::from_code(code)?;
        let args = match rest {
            None => Vec::new(),
            Some(rest) => {
                let inner = rest.strip_suffix(')')?;
                if inner.is_empty() {
                    Vec::new()
                } else {
                    inner.split(',').map(|a| a.trim().to_string()).collect()
                }
            }
        };
        Some(Self { opcode, args })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode.code())?;
        if !self.args.is_empty() {
            write!(f, "({})", self.args.join(","))?;
        }
        Ok(())
    }
}

/// Decoded reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Command accepted, no payload.
    Ack,
    /// Command rejected by the camera.
    Nak,
    /// Payload with delimiters stripped.
    Value(String),
}

/// Decode one reply line as sent by the camera.
///
/// The camera wraps payloads as `>` payload delimiter. The leading marker and
/// one trailing delimiter byte are removed. A lone NAK (with or without the
/// marker) is the rejection token.
pub fn parse_reply(raw: &str) -> Reply {
    let line = raw.trim_end_matches(['\r', '\n']);
    let body = line.strip_prefix(REPLY_MARKER).unwrap_or(line);

    if body.starts_with(NAK) && body.trim_end_matches(NAK).is_empty() {
        return Reply::Nak;
    }

    let body = match body.chars().last() {
        Some(last) if is_delimiter(last) => &body[..body.len() - last.len_utf8()],
        _ => body,
    };
    let body = body.trim();

    if body.is_empty() {
        Reply::Ack
    } else {
        Reply::Value(body.to_string())
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_ascii_control() || c == '<'
}

/// Wire form of a reply, as the simulated camera produces it.
pub fn format_reply(reply: &Reply) -> String {
    match reply {
        Reply::Ack => format!("{REPLY_MARKER}{ACK}"),
        Reply::Nak => format!("{REPLY_MARKER}{NAK}"),
        Reply::Value(v) => format!("{REPLY_MARKER}{v}{ACK}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_commands_like_the_camera_expects() {
        assert_eq!(Command::set(Opcode::Gain, 2).to_string(), "#G(2)");
        assert_eq!(Command::set(Opcode::Gain, 2.25).to_string(), "#G(2.25)");
        assert_eq!(
            Command::frame_format(0, 16, 1024, 512).to_string(),
            "#R(0,16,1024,512)"
        );
        assert_eq!(Command::new(Opcode::MaxExposure).to_string(), "#a");
    }

    #[test]
    fn parses_wire_form() {
        let cmd = Command::parse("#R(0,0,640,480)").unwrap();
        assert_eq!(cmd.opcode(), Opcode::FrameFormat);
        assert_eq!(cmd.args(), ["0", "0", "640", "480"]);

        let query = Command::parse("#A").unwrap();
        assert_eq!(query.opcode(), Opcode::MaxFrameRate);
        assert!(query.args().is_empty());

        assert!(Command::parse("#Q(1)").is_none());
        assert!(Command::parse("#G(1").is_none());
    }

    #[test]
    fn opcodes_are_case_sensitive() {
        assert_eq!(Opcode::from_code("#d"), Some(Opcode::DualSlopeTime));
        assert_eq!(Opcode::from_code("#D"), Some(Opcode::DualSlope));
        assert_eq!(Opcode::from_code("#a"), Some(Opcode::MaxExposure));
        assert_eq!(Opcode::from_code("#A"), Some(Opcode::MaxFrameRate));
    }

    #[test]
    fn strips_reply_delimiters() {
        assert_eq!(parse_reply(">33328\u{06}\r\n"), Reply::Value("33328".into()));
        assert_eq!(parse_reply("507\u{06}\r\n"), Reply::Value("507".into()));
        assert_eq!(parse_reply(">\u{06}\r\n"), Reply::Ack);
        assert_eq!(parse_reply(">\u{15}\r\n"), Reply::Nak);
        assert_eq!(parse_reply("\u{15}"), Reply::Nak);
    }

    #[test]
    fn reply_wire_form_decodes_to_itself() {
        for reply in [Reply::Ack, Reply::Nak, Reply::Value("1234".into())] {
            assert_eq!(parse_reply(&format_reply(&reply)), reply);
        }
    }
}
