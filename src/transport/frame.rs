//! STOMP 1.2 frame codec for WebSocket text messages.
//!
//! A frame is `COMMAND\n(header:value\n)*\n<body>\0`. A message made only of
//! end-of-line characters is a heart-beat and decodes to `None`.

use std::fmt;

/// Commands this client sends or expects to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StompCommand {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl StompCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            StompCommand::Connect => "CONNECT",
            StompCommand::Stomp => "STOMP",
            StompCommand::Connected => "CONNECTED",
            StompCommand::Send => "SEND",
            StompCommand::Subscribe => "SUBSCRIBE",
            StompCommand::Unsubscribe => "UNSUBSCRIBE",
            StompCommand::Disconnect => "DISCONNECT",
            StompCommand::Message => "MESSAGE",
            StompCommand::Receipt => "RECEIPT",
            StompCommand::Error => "ERROR",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "CONNECT" => StompCommand::Connect,
            "STOMP" => StompCommand::Stomp,
            "CONNECTED" => StompCommand::Connected,
            "SEND" => StompCommand::Send,
            "SUBSCRIBE" => StompCommand::Subscribe,
            "UNSUBSCRIBE" => StompCommand::Unsubscribe,
            "DISCONNECT" => StompCommand::Disconnect,
            "MESSAGE" => StompCommand::Message,
            "RECEIPT" => StompCommand::Receipt,
            "ERROR" => StompCommand::Error,
            _ => return None,
        })
    }

    /// CONNECT and CONNECTED headers are never escaped (STOMP 1.2 §Value Encoding).
    fn escapes_headers(&self) -> bool {
        !matches!(
            self,
            StompCommand::Connect | StompCommand::Stomp | StompCommand::Connected
        )
    }
}

impl fmt::Display for StompCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("frame is missing its NUL terminator")]
    Unterminated,
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: StompCommand,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `name`; repeated headers after the first are ignored.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode one frame. Returns `Ok(None)` for heart-beats.
    pub fn parse(raw: &str) -> Result<Option<Frame>, FrameError> {
        let raw = raw.trim_start_matches(['\r', '\n']);
        if raw.is_empty() {
            return Ok(None);
        }

        let (head, rest) = split_head(raw);
        let mut lines = head.lines();
        let command_line = lines.next().unwrap_or_default().trim_end_matches('\r');
        let command = StompCommand::parse(command_line)
            .ok_or_else(|| FrameError::UnknownCommand(command_line.to_string()))?;

        let escaped = command.escapes_headers();
        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if escaped {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let mut frame = Frame {
            command,
            headers,
            body: String::new(),
        };

        frame.body = match frame.header("content-length") {
            Some(len) => {
                let len: usize = len
                    .trim()
                    .parse()
                    .map_err(|_| FrameError::InvalidContentLength(len.to_string()))?;
                let body = rest
                    .get(..len)
                    .ok_or_else(|| FrameError::InvalidContentLength(len.to_string()))?;
                if !rest[len..].starts_with('\0') {
                    return Err(FrameError::Unterminated);
                }
                body.to_string()
            }
            None => {
                let end = rest.find('\0').ok_or(FrameError::Unterminated)?;
                rest[..end].to_string()
            }
        };

        Ok(Some(frame))
    }
}

/// Split at the blank line that ends the header block.
fn split_head(raw: &str) -> (&str, &str) {
    let lf = raw.find("\n\n").map(|i| (i, 2));
    let crlf = raw.find("\r\n\r\n").map(|i| (i, 4));
    let split = match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((i, sep)) => (&raw[..i], &raw[i + sep..]),
        // Headers only, no body separator: treat everything after as empty body.
        None => (raw.trim_end_matches('\0'), "\0"),
    }
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}

/// Heart-beat periods agreed with the broker. `None` means disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub outgoing: Option<std::time::Duration>,
    pub incoming: Option<std::time::Duration>,
}

impl Heartbeat {
    /// Combine our `heart-beat:cx,cy` offer with the broker's `sx,sy` reply.
    pub fn negotiate(client: (u64, u64), server_header: Option<&str>) -> Self {
        let (sx, sy) = server_header
            .and_then(|h| h.split_once(','))
            .and_then(|(a, b)| Some((a.trim().parse::<u64>().ok()?, b.trim().parse::<u64>().ok()?)))
            .unwrap_or((0, 0));
        let (cx, cy) = client;
        let period = |ours: u64, theirs: u64| {
            (ours != 0 && theirs != 0)
                .then(|| std::time::Duration::from_millis(ours.max(theirs)))
        };
        Self {
            outgoing: period(cx, sy),
            incoming: period(cy, sx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn encode_message_frame() {
        let frame = Frame::new(StompCommand::Send)
            .with_header("destination", "/app/test")
            .with_body("{\"x\":1}");
        assert_eq!(frame.encode(), "SEND\ndestination:/app/test\n\n{\"x\":1}\0");
    }

    #[test]
    fn parse_message_frame() {
        let raw = "MESSAGE\ndestination:/topic/discussions\nsubscription:sub-1\nmessage-id:7\n\n{\"type\":\"thread_created\"}\0";
        let frame = assert_ok!(Frame::parse(raw)).unwrap();
        assert_eq!(frame.command, StompCommand::Message);
        assert_eq!(frame.header("subscription"), Some("sub-1"));
        assert_eq!(frame.body, "{\"type\":\"thread_created\"}");
    }

    #[test]
    fn heartbeat_is_not_a_frame() {
        assert_eq!(Frame::parse("\n"), Ok(None));
        assert_eq!(Frame::parse("\r\n\r\n"), Ok(None));
    }

    #[test]
    fn header_escaping_applies_outside_connect() {
        let frame = Frame::new(StompCommand::Send)
            .with_header("note", "a:b\nc\\d")
            .with_body("");
        let encoded = frame.encode();
        assert!(encoded.contains("note:a\\cb\\nc\\\\d\n"));
        let parsed = Frame::parse(&encoded).unwrap().unwrap();
        assert_eq!(parsed.header("note"), Some("a:b\nc\\d"));
    }

    #[test]
    fn connected_headers_are_taken_literally() {
        let raw = "CONNECTED\nversion:1.2\nserver:broker\\x\n\n\0";
        let frame = Frame::parse(raw).unwrap().unwrap();
        assert_eq!(frame.header("server"), Some("broker\\x"));
    }

    #[test]
    fn first_repeated_header_wins() {
        let raw = "MESSAGE\nfoo:1\nfoo:2\n\n\0";
        let frame = Frame::parse(raw).unwrap().unwrap();
        assert_eq!(frame.header("foo"), Some("1"));
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let raw = "MESSAGE\ncontent-length:3\n\na\0b\0";
        let frame = Frame::parse(raw).unwrap().unwrap();
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let raw = "MESSAGE\r\ndestination:/topic/x\r\n\r\nhi\0";
        let frame = Frame::parse(raw).unwrap().unwrap();
        assert_eq!(frame.header("destination"), Some("/topic/x"));
        assert_eq!(frame.body, "hi");
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            assert_err!(Frame::parse("HELLO\n\n\0")),
            FrameError::UnknownCommand("HELLO".to_string())
        );
        assert!(matches!(
            Frame::parse("MESSAGE\nno-colon\n\n\0"),
            Err(FrameError::MalformedHeader(_))
        ));
        assert_eq!(Frame::parse("MESSAGE\n\nbody"), Err(FrameError::Unterminated));
        assert!(matches!(
            Frame::parse("MESSAGE\nbad:\\t\n\n\0"),
            Err(FrameError::InvalidEscape(_))
        ));
    }

    #[test]
    fn heartbeat_negotiation() {
        let hb = Heartbeat::negotiate((10_000, 10_000), Some("5000,20000"));
        assert_eq!(hb.outgoing, Some(Duration::from_millis(20_000)));
        assert_eq!(hb.incoming, Some(Duration::from_millis(10_000)));

        let off = Heartbeat::negotiate((10_000, 10_000), Some("0,0"));
        assert_eq!(off, Heartbeat::default());

        let missing = Heartbeat::negotiate((10_000, 0), None);
        assert_eq!(missing, Heartbeat::default());
    }
}
