//! Text wire protocol: space-delimited fields, one message per datagram
//!
//! Requests and replies travel over the request/response channel, broadcasts
//! over the publish/subscribe channel as `TOPIC:<fields>`. Coordinates are
//! always written with a decimal point (`5.0`, not `5`) and must parse back
//! to finite floats.

use crate::error::NetError;
use std::fmt;
use std::str::FromStr;

/// Position of one session as it appears in a state reply or broadcast
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteState {
    pub id: u32,
    pub x: f32,
    pub y: f32,
}

impl RemoteState {
    pub fn new(id: u32, x: f32, y: f32) -> Self {
        Self { id, x, y }
    }
}

/// Client to server
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Connect,
    Disconnect { id: u32 },
    Position { id: u32, x: f32, y: f32 },
    UpdateAndGetState { id: u32, x: f32, y: f32 },
}

/// Server to client, exactly one per request
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Connected { id: u32, x: f32, y: f32 },
    Disconnected,
    /// Bare `OK` acknowledging a `POSITION`
    Ack,
    /// `OK` followed by one `<id> <x> <y>` triple per live session
    State(Vec<RemoteState>),
    Error(String),
}

impl Reply {
    pub fn error(reason: impl Into<String>) -> Self {
        Reply::Error(reason.into())
    }

    /// Session list carried by an `OK` reply. A bare `OK` is an empty list.
    pub fn into_states(self) -> Option<Vec<RemoteState>> {
        match self {
            Reply::Ack => Some(Vec::new()),
            Reply::State(states) => Some(states),
            _ => None,
        }
    }
}

/// Server to every subscriber in the broadcast variant
#[derive(Debug, Clone, PartialEq)]
pub enum Broadcast {
    ClientConnected { id: u32, x: f32, y: f32 },
    ClientDisconnected { id: u32 },
    PositionUpdate { id: u32, x: f32, y: f32, timestamp_ms: u64 },
}

impl Broadcast {
    pub fn topic(&self) -> &'static str {
        match self {
            Broadcast::ClientConnected { .. } => "CLIENT_CONNECTED",
            Broadcast::ClientDisconnected { .. } => "CLIENT_DISCONNECTED",
            Broadcast::PositionUpdate { .. } => "POSITION_UPDATE",
        }
    }
}

struct Coord(f32);

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug keeps the trailing ".0" on whole numbers
        write!(f, "{:?}", self.0)
    }
}

fn parse_id(token: Option<&str>) -> Option<u32> {
    token?.parse().ok()
}

fn parse_coord(token: Option<&str>) -> Option<f32> {
    token?.parse::<f32>().ok().filter(|v| v.is_finite())
}

fn parse_triple<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Option<(u32, f32, f32)> {
    let id = parse_id(fields.next())?;
    let x = parse_coord(fields.next())?;
    let y = parse_coord(fields.next())?;
    Some((id, x, y))
}

fn expect_end<'a>(
    mut fields: impl Iterator<Item = &'a str>,
    reason: &str,
) -> Result<(), NetError> {
    match fields.next() {
        None => Ok(()),
        Some(_) => Err(NetError::malformed(reason)),
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Connect => write!(f, "CONNECT"),
            Request::Disconnect { id } => write!(f, "DISCONNECT {}", id),
            Request::Position { id, x, y } => {
                write!(f, "POSITION {} {} {}", id, Coord(*x), Coord(*y))
            }
            Request::UpdateAndGetState { id, x, y } => {
                write!(f, "UPDATE_AND_GET_STATE {} {} {}", id, Coord(*x), Coord(*y))
            }
        }
    }
}

impl FromStr for Request {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split_whitespace();
        let command = fields
            .next()
            .ok_or_else(|| NetError::malformed("Empty request"))?;

        match command {
            "CONNECT" => {
                expect_end(fields, "Invalid connect format")?;
                Ok(Request::Connect)
            }
            "DISCONNECT" => {
                let id = parse_id(fields.next())
                    .ok_or_else(|| NetError::malformed("Invalid disconnect format"))?;
                expect_end(fields, "Invalid disconnect format")?;
                Ok(Request::Disconnect { id })
            }
            "POSITION" => {
                let (id, x, y) = parse_triple(&mut fields)
                    .ok_or_else(|| NetError::malformed("Invalid position format"))?;
                expect_end(fields, "Invalid position format")?;
                Ok(Request::Position { id, x, y })
            }
            "UPDATE_AND_GET_STATE" => {
                let (id, x, y) = parse_triple(&mut fields)
                    .ok_or_else(|| NetError::malformed("Invalid update format"))?;
                expect_end(fields, "Invalid update format")?;
                Ok(Request::UpdateAndGetState { id, x, y })
            }
            other => Err(NetError::malformed(format!("Unknown command: {}", other))),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Connected { id, x, y } => {
                write!(f, "CONNECTED {} {} {}", id, Coord(*x), Coord(*y))
            }
            Reply::Disconnected => write!(f, "DISCONNECTED"),
            Reply::Ack => write!(f, "OK"),
            Reply::State(states) => {
                write!(f, "OK")?;
                for state in states {
                    write!(f, " {} {} {}", state.id, Coord(state.x), Coord(state.y))?;
                }
                Ok(())
            }
            Reply::Error(reason) => write!(f, "ERROR {}", reason),
        }
    }
}

impl FromStr for Reply {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (status, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((status, rest)) => (status, rest.trim_start()),
            None => (trimmed, ""),
        };

        match status {
            "CONNECTED" => {
                let mut fields = rest.split_whitespace();
                let (id, x, y) = parse_triple(&mut fields)
                    .ok_or_else(|| NetError::malformed("Invalid CONNECTED response format"))?;
                expect_end(fields, "Invalid CONNECTED response format")?;
                Ok(Reply::Connected { id, x, y })
            }
            "DISCONNECTED" => {
                expect_end(rest.split_whitespace(), "Invalid DISCONNECTED response format")?;
                Ok(Reply::Disconnected)
            }
            "OK" => {
                let fields: Vec<&str> = rest.split_whitespace().collect();
                if fields.is_empty() {
                    return Ok(Reply::Ack);
                }
                if fields.len() % 3 != 0 {
                    return Err(NetError::malformed(format!(
                        "State reply has {} fields, expected triples",
                        fields.len()
                    )));
                }

                let states = fields
                    .chunks(3)
                    .map(|chunk| {
                        parse_triple(&mut chunk.iter().copied())
                            .map(|(id, x, y)| RemoteState::new(id, x, y))
                            .ok_or_else(|| NetError::malformed("Invalid state triple"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Reply::State(states))
            }
            "ERROR" => Ok(Reply::Error(rest.to_string())),
            "" => Err(NetError::malformed("Empty reply")),
            other => Err(NetError::malformed(format!("Unexpected reply: {}", other))),
        }
    }
}

impl fmt::Display for Broadcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.topic())?;
        match self {
            Broadcast::ClientConnected { id, x, y } => {
                write!(f, "{} {} {}", id, Coord(*x), Coord(*y))
            }
            Broadcast::ClientDisconnected { id } => write!(f, "{}", id),
            Broadcast::PositionUpdate {
                id,
                x,
                y,
                timestamp_ms,
            } => write!(f, "{} {} {} {}", id, Coord(*x), Coord(*y), timestamp_ms),
        }
    }
}

impl FromStr for Broadcast {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (topic, body) = s
            .split_once(':')
            .ok_or_else(|| NetError::malformed("Invalid broadcast message format"))?;
        let mut fields = body.split_whitespace();

        let message = match topic {
            "CLIENT_CONNECTED" => {
                let (id, x, y) = parse_triple(&mut fields)
                    .ok_or_else(|| NetError::malformed("Invalid CLIENT_CONNECTED format"))?;
                Broadcast::ClientConnected { id, x, y }
            }
            "CLIENT_DISCONNECTED" => {
                let id = parse_id(fields.next())
                    .ok_or_else(|| NetError::malformed("Invalid CLIENT_DISCONNECTED format"))?;
                Broadcast::ClientDisconnected { id }
            }
            "POSITION_UPDATE" => {
                let (id, x, y) = parse_triple(&mut fields)
                    .ok_or_else(|| NetError::malformed("Invalid POSITION_UPDATE format"))?;
                let timestamp_ms = fields
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(|| NetError::malformed("Invalid POSITION_UPDATE timestamp"))?;
                Broadcast::PositionUpdate {
                    id,
                    x,
                    y,
                    timestamp_ms,
                }
            }
            other => return Err(NetError::malformed(format!("Unknown topic: {}", other))),
        };

        expect_end(fields, "Trailing broadcast fields")?;
        Ok(message)
    }
}
