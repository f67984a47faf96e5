//! Memcache command reconstruction from single captured frames.
//!
//! Only the first line of a TCP payload is examined. Headers split across
//! segments are not reassembled; such frames classify as
//! [`CommandKind::NonMatching`].

use std::net::IpAddr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use crate::models::domain::{Event, Frame};

const RESPONSE_TOKEN: &[u8] = b"VALUE";

const REQUEST_COMMANDS: &[&str] = &[
    "get", "gets", "gat", "gats", "set", "add", "replace", "append", "prepend", "cas", "delete",
    "incr", "decr", "touch",
];

/// Which way a segment travels relative to the cache server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Request,
    /// Server to client.
    Response,
    Unknown,
}

impl Direction {
    /// Classifies a segment by its endpoints. The local address decides when
    /// either endpoint matches it; otherwise the cache port does, which covers
    /// secondary and IPv6 addresses of the capture interface.
    pub fn classify(
        src: (IpAddr, u16),
        dst: (IpAddr, u16),
        local: Option<IpAddr>,
        port: u16,
    ) -> Direction {
        match local {
            Some(addr) if src.0 == addr && src.1 == port => Direction::Response,
            Some(addr) if dst.0 == addr && dst.1 == port => Direction::Request,
            _ if src.1 == port => Direction::Response,
            _ if dst.1 == port => Direction::Request,
            _ => Direction::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Request {
        name: String,
        key: Option<String>,
    },
    Response {
        key: String,
        size: u64,
    },
    NonMatching,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
}

impl Command {
    pub fn non_matching() -> Self {
        Command {
            kind: CommandKind::NonMatching,
        }
    }

    /// Decodes Ethernet/IP/TCP framing and classifies the TCP payload.
    pub fn create(frame: &Frame, local: Option<IpAddr>, port: u16) -> Self {
        let Ok(packet) = SlicedPacket::from_ethernet(&frame.data) else {
            return Command::non_matching();
        };
        let (src_ip, dst_ip): (IpAddr, IpAddr) = match &packet.net {
            Some(NetSlice::Ipv4(ipv4)) => (
                ipv4.header().source_addr().into(),
                ipv4.header().destination_addr().into(),
            ),
            Some(NetSlice::Ipv6(ipv6)) => (
                ipv6.header().source_addr().into(),
                ipv6.header().destination_addr().into(),
            ),
            None => return Command::non_matching(),
        };
        let Some(TransportSlice::Tcp(tcp)) = &packet.transport else {
            return Command::non_matching();
        };

        let direction = Direction::classify(
            (src_ip, tcp.source_port()),
            (dst_ip, tcp.destination_port()),
            local,
            port,
        );
        Command::parse(tcp.payload(), direction)
    }

    /// Classifies a raw TCP payload already known to travel in `direction`.
    pub fn parse(payload: &[u8], direction: Direction) -> Self {
        let kind = match direction {
            Direction::Response => parse_response(payload),
            Direction::Request => parse_request(payload),
            Direction::Unknown => None,
        };
        Command {
            kind: kind.unwrap_or(CommandKind::NonMatching),
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self.kind, CommandKind::Response { .. })
    }

    pub fn is_request(&self) -> bool {
        matches!(self.kind, CommandKind::Request { .. })
    }

    /// The stats event for a response; `None` for anything else.
    pub fn to_event(&self) -> Option<Event> {
        match &self.kind {
            CommandKind::Response { key, size } => Some(Event::new(key.clone(), *size)),
            _ => None,
        }
    }
}

/// First `\r\n`-terminated line of the payload, if it is complete and UTF-8.
fn header_line(payload: &[u8]) -> Option<&str> {
    let end = payload.windows(2).position(|w| w == b"\r\n")?;
    std::str::from_utf8(&payload[..end]).ok()
}

// VALUE <key> <flags> <bytes> [<cas unique>]
fn parse_response(payload: &[u8]) -> Option<CommandKind> {
    if !payload.starts_with(RESPONSE_TOKEN) {
        return None;
    }
    let mut fields = header_line(payload)?.split_ascii_whitespace();
    if fields.next()?.as_bytes() != RESPONSE_TOKEN {
        return None;
    }
    let key = fields.next()?;
    fields.next()?.parse::<u32>().ok()?;
    let size = fields.next()?.parse::<u64>().ok()?;
    if let Some(cas) = fields.next() {
        cas.parse::<u64>().ok()?;
    }
    if fields.next().is_some() {
        return None;
    }
    Some(CommandKind::Response {
        key: key.to_string(),
        size,
    })
}

fn parse_request(payload: &[u8]) -> Option<CommandKind> {
    let mut fields = header_line(payload)?.split_ascii_whitespace();
    let name = fields.next()?;
    if !REQUEST_COMMANDS.contains(&name) {
        return None;
    }
    Some(CommandKind::Request {
        name: name.to_string(),
        key: fields.next().map(str::to_string),
    })
}
