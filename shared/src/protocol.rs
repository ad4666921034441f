//! Binary wire protocol spoken between the session server and game clients.
//!
//! Every message has the same shape regardless of its kind:
//!
//! ```text
//! [i32 kind][varint text length][text bytes][i32 player id][f32 x 7]
//! ```
//!
//! All integers and floats are little-endian. The text length prefix is an
//! unsigned varint of 7-bit groups (low group first, high bit set on every
//! byte but the last), which matches the .NET `BinaryWriter` string format.
//! Unused float slots are zero-filled.
//!
//! TCP gives no message boundaries, so decoding works on a byte buffer and
//! reports "need more data" instead of blocking. [`MessageReader`] keeps the
//! partial tail of a stream between reads.

use std::io::{self, Read};

use thiserror::Error;

use crate::{InputAxes, Quat, Transform, Vec3};

/// Upper bound for the text field, in bytes.
pub const MAX_TEXT_LEN: usize = 4096;
/// Messages handed out by a single [`MessageReader::drain`] call.
pub const MAX_MESSAGES_PER_DRAIN: usize = 256;
/// Bytes a [`MessageReader`] will hold before it stops pulling from its source.
pub const MAX_BUFFERED_BYTES: usize = 64 * 1024;

const FLOAT_COUNT: usize = 7;
const KIND_LEN: usize = 4;
const TAIL_LEN: usize = 4 + FLOAT_COUNT * 4;
const MAX_VARINT_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Connect,
    Disconnect,
    Ready,
    Reject,
    Spawn,
    Position,
    PositionOwn,
    PlayerInput,
    PlayerLeft,
}

impl MessageKind {
    const ALL: [MessageKind; 9] = [
        MessageKind::Connect,
        MessageKind::Disconnect,
        MessageKind::Ready,
        MessageKind::Reject,
        MessageKind::Spawn,
        MessageKind::Position,
        MessageKind::PositionOwn,
        MessageKind::PlayerInput,
        MessageKind::PlayerLeft,
    ];

    pub fn from_wire(value: i32) -> Result<Self, ProtocolError> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .ok_or(ProtocolError::UnknownKind(value))
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown message kind {0}")]
    UnknownKind(i32),
    #[error("malformed text length prefix")]
    MalformedLength,
    #[error("text of {len} bytes exceeds the {max} byte limit")]
    TextTooLong { len: usize, max: usize },
    #[error("text is not valid UTF-8")]
    InvalidUtf8,
}

/// The single envelope used for every message kind.
///
/// The seven floats are positional: position (x, y, z) followed by rotation
/// (x, y, z, w) for spawn and position messages, input axes (x, z) in the
/// first two slots for `PlayerInput`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
    pub player_id: i32,
    pub floats: [f32; FLOAT_COUNT],
}

impl Message {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            text: String::new(),
            player_id: 0,
            floats: [0.0; FLOAT_COUNT],
        }
    }

    pub fn connect(token: impl Into<String>) -> Self {
        Self {
            text: token.into(),
            ..Self::new(MessageKind::Connect)
        }
    }

    pub fn disconnect() -> Self {
        Self::new(MessageKind::Disconnect)
    }

    pub fn ready() -> Self {
        Self::new(MessageKind::Ready)
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            text: reason.into(),
            ..Self::new(MessageKind::Reject)
        }
    }

    pub fn spawn(transform: &Transform) -> Self {
        Self::new(MessageKind::Spawn).with_transform(transform)
    }

    pub fn position(player_id: i32, transform: &Transform) -> Self {
        Self::new(MessageKind::Position)
            .with_transform(transform)
            .with_player(player_id)
    }

    pub fn position_own(player_id: i32, transform: &Transform) -> Self {
        Self::new(MessageKind::PositionOwn)
            .with_transform(transform)
            .with_player(player_id)
    }

    pub fn input(axes: InputAxes) -> Self {
        let mut message = Self::new(MessageKind::PlayerInput);
        message.floats[0] = axes.x;
        message.floats[1] = axes.z;
        message
    }

    pub fn player_left(player_id: i32) -> Self {
        Self::new(MessageKind::PlayerLeft).with_player(player_id)
    }

    pub fn with_player(mut self, player_id: i32) -> Self {
        self.player_id = player_id;
        self
    }

    pub fn with_transform(mut self, transform: &Transform) -> Self {
        let Transform { position, rotation } = transform;
        self.floats = [
            position.x, position.y, position.z, rotation.x, rotation.y, rotation.z, rotation.w,
        ];
        self
    }

    pub fn transform(&self) -> Transform {
        let f = &self.floats;
        Transform {
            position: Vec3::new(f[0], f[1], f[2]),
            rotation: Quat {
                x: f[3],
                y: f[4],
                z: f[5],
                w: f[6],
            },
        }
    }

    pub fn input_axes(&self) -> InputAxes {
        InputAxes::new(self.floats[0], self.floats[1])
    }
}

/// Serializes a message into a fresh buffer.
pub fn encode(message: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(KIND_LEN + MAX_VARINT_LEN + message.text.len() + TAIL_LEN);
    encode_into(message, &mut out);
    out
}

/// Appends the wire form of `message` to `out`.
pub fn encode_into(message: &Message, out: &mut Vec<u8>) {
    out.extend_from_slice(&message.kind.to_wire().to_le_bytes());
    write_text_len(out, message.text.len());
    out.extend_from_slice(message.text.as_bytes());
    out.extend_from_slice(&message.player_id.to_le_bytes());
    for value in &message.floats {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Decodes one message from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` holds only part of a message, otherwise the
/// message together with the number of bytes it occupied.
pub fn decode(buf: &[u8]) -> Result<Option<(Message, usize)>, ProtocolError> {
    if buf.len() < KIND_LEN {
        return Ok(None);
    }
    let kind = MessageKind::from_wire(i32::from_le_bytes(word_at(buf, 0)))?;

    let Some((text_len, prefix_len)) = read_text_len(&buf[KIND_LEN..])? else {
        return Ok(None);
    };
    if text_len > MAX_TEXT_LEN {
        return Err(ProtocolError::TextTooLong {
            len: text_len,
            max: MAX_TEXT_LEN,
        });
    }

    let text_start = KIND_LEN + prefix_len;
    let tail_start = text_start + text_len;
    let total = tail_start + TAIL_LEN;
    if buf.len() < total {
        return Ok(None);
    }

    let text = std::str::from_utf8(&buf[text_start..tail_start])
        .map_err(|_| ProtocolError::InvalidUtf8)?
        .to_owned();
    let player_id = i32::from_le_bytes(word_at(buf, tail_start));

    let mut floats = [0.0f32; FLOAT_COUNT];
    for (i, slot) in floats.iter_mut().enumerate() {
        *slot = f32::from_le_bytes(word_at(buf, tail_start + 4 + i * 4));
    }

    Ok(Some((
        Message {
            kind,
            text,
            player_id,
            floats,
        },
        total,
    )))
}

fn word_at(buf: &[u8], at: usize) -> [u8; 4] {
    [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
}

fn write_text_len(out: &mut Vec<u8>, len: usize) {
    let mut remaining = len;
    while remaining >= 0x80 {
        out.push((remaining as u8 & 0x7f) | 0x80);
        remaining >>= 7;
    }
    out.push(remaining as u8);
}

/// Reads the varint length prefix. Returns the value and the prefix size.
fn read_text_len(buf: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    let mut value: u32 = 0;
    for (i, &byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        // The fifth group may only carry the top four bits of a 32-bit value.
        if i == MAX_VARINT_LEN - 1 && byte > 0x0f {
            return Err(ProtocolError::MalformedLength);
        }
        value |= ((byte & 0x7f) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value as usize, i + 1)));
        }
    }
    Ok(None)
}

/// Whether the last read found the peer still connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Open,
    Closed,
}

/// Result of draining a [`MessageReader`].
#[derive(Debug, Default)]
pub struct Drained {
    /// Messages decoded before any error, in stream order.
    pub messages: Vec<Message>,
    /// Set when decoding stopped on corrupt data. The rest of the buffer is discarded.
    pub error: Option<ProtocolError>,
}

/// Accumulates stream bytes and splits them into messages.
#[derive(Debug, Default)]
pub struct MessageReader {
    buffer: Vec<u8>,
}

impl MessageReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pulls whatever a non-blocking source has ready without waiting for more.
    ///
    /// Stops early once [`MAX_BUFFERED_BYTES`] are held; the rest stays in the
    /// source for a later call.
    pub fn read_available<R: Read>(&mut self, source: &mut R) -> io::Result<ReadStatus> {
        let mut chunk = [0u8; 4096];
        while self.buffer.len() < MAX_BUFFERED_BYTES {
            match source.read(&mut chunk) {
                Ok(0) => return Ok(ReadStatus::Closed),
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(ReadStatus::Open)
    }

    /// Decodes the next complete message, leaving partial data buffered.
    pub fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        match decode(&self.buffer)? {
            Some((message, consumed)) => {
                self.buffer.drain(..consumed);
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// Decodes up to [`MAX_MESSAGES_PER_DRAIN`] buffered messages.
    ///
    /// A decode error ends the drain and clears the buffer, since a
    /// fixed-shape stream cannot be resynchronised. Messages decoded before
    /// the error are still returned.
    pub fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        while drained.messages.len() < MAX_MESSAGES_PER_DRAIN {
            match self.next_message() {
                Ok(Some(message)) => drained.messages.push(message),
                Ok(None) => break,
                Err(e) => {
                    self.buffer.clear();
                    drained.error = Some(e);
                    break;
                }
            }
        }
        drained
    }
}
