//! The MQTT 3.1 subset spoken over the realtime websocket.

use crate::error::MqttError;

pub const PROTOCOL_NAME: &str = "MQIsdp";
pub const PROTOCOL_LEVEL: u8 = 3;

const CONNECT: u8 = 1;
const CONNACK: u8 = 2;
const PUBLISH: u8 = 3;
const PUBACK: u8 = 4;
const SUBSCRIBE: u8 = 8;
const SUBACK: u8 = 9;
const UNSUBSCRIBE: u8 = 10;
const UNSUBACK: u8 = 11;
const PINGREQ: u8 = 12;
const PINGRESP: u8 = 13;
const DISCONNECT: u8 = 14;

const FLAG_USERNAME: u8 = 0x80;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_CLEAN_SESSION: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_name: String,
    pub level: u8,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    pub dup: bool,
    /// Present only for QoS 1 and 2.
    pub packet_id: Option<u16>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck { session_present: bool, code: u8 },
    Publish(Publish),
    PubAck { packet_id: u16 },
    Subscribe { packet_id: u16, topics: Vec<(String, u8)> },
    SubAck { packet_id: u16, codes: Vec<u8> },
    Unsubscribe { packet_id: u16, topics: Vec<String> },
    UnsubAck { packet_id: u16 },
    PingReq,
    PingResp,
    Disconnect,
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), MqttError> {
    let len = u16::try_from(bytes.len()).map_err(|_| MqttError::FieldTooLong(bytes.len()))?;
    put_u16(out, len);
    out.extend_from_slice(bytes);
    Ok(())
}

fn put_remaining_length(out: &mut Vec<u8>, mut len: usize) -> Result<(), MqttError> {
    if len > 268_435_455 {
        return Err(MqttError::MalformedLength);
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            return Ok(());
        }
    }
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, MqttError> {
        let mut body = Vec::new();
        let header = match self {
            Self::Connect(connect) => {
                put_bytes(&mut body, connect.protocol_name.as_bytes())?;
                body.push(connect.level);
                let mut flags = 0;
                if connect.clean_session {
                    flags |= FLAG_CLEAN_SESSION;
                }
                if connect.username.is_some() {
                    flags |= FLAG_USERNAME;
                }
                if connect.password.is_some() {
                    flags |= FLAG_PASSWORD;
                }
                body.push(flags);
                put_u16(&mut body, connect.keep_alive);
                put_bytes(&mut body, connect.client_id.as_bytes())?;
                if let Some(username) = &connect.username {
                    put_bytes(&mut body, username.as_bytes())?;
                }
                if let Some(password) = &connect.password {
                    put_bytes(&mut body, password)?;
                }
                CONNECT << 4
            }
            Self::ConnAck {
                session_present,
                code,
            } => {
                body.push(u8::from(*session_present));
                body.push(*code);
                CONNACK << 4
            }
            Self::Publish(publish) => {
                put_bytes(&mut body, publish.topic.as_bytes())?;
                if publish.qos > 0 {
                    put_u16(&mut body, publish.packet_id.unwrap_or(1));
                }
                body.extend_from_slice(&publish.payload);
                (PUBLISH << 4)
                    | (u8::from(publish.dup) << 3)
                    | ((publish.qos & 0x03) << 1)
                    | u8::from(publish.retain)
            }
            Self::PubAck { packet_id } => {
                put_u16(&mut body, *packet_id);
                PUBACK << 4
            }
            Self::Subscribe { packet_id, topics } => {
                put_u16(&mut body, *packet_id);
                for (topic, qos) in topics {
                    put_bytes(&mut body, topic.as_bytes())?;
                    body.push(*qos);
                }
                (SUBSCRIBE << 4) | 0x02
            }
            Self::SubAck { packet_id, codes } => {
                put_u16(&mut body, *packet_id);
                body.extend_from_slice(codes);
                SUBACK << 4
            }
            Self::Unsubscribe { packet_id, topics } => {
                put_u16(&mut body, *packet_id);
                for topic in topics {
                    put_bytes(&mut body, topic.as_bytes())?;
                }
                (UNSUBSCRIBE << 4) | 0x02
            }
            Self::UnsubAck { packet_id } => {
                put_u16(&mut body, *packet_id);
                UNSUBACK << 4
            }
            Self::PingReq => PINGREQ << 4,
            Self::PingResp => PINGRESP << 4,
            Self::Disconnect => DISCONNECT << 4,
        };

        let mut out = Vec::with_capacity(body.len() + 5);
        out.push(header);
        put_remaining_length(&mut out, body.len())?;
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decodes one packet from the front of `buf`, returning it with the
    /// number of bytes consumed. [`MqttError::Truncated`] means more input is
    /// needed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), MqttError> {
        let (&header, rest) = buf.split_first().ok_or(MqttError::Truncated)?;
        let (len, len_bytes) = read_remaining_length(rest)?;
        let start = 1 + len_bytes;
        let end = start.checked_add(len).ok_or(MqttError::MalformedLength)?;
        if buf.len() < end {
            return Err(MqttError::Truncated);
        }
        let mut reader = Reader::new(&buf[start..end]);
        let flags = header & 0x0F;

        let packet = match header >> 4 {
            CONNECT => {
                let protocol_name = reader.string("protocol name")?;
                let level = reader.u8()?;
                let connect_flags = reader.u8()?;
                let keep_alive = reader.u16()?;
                let client_id = reader.string("client id")?;
                let username = (connect_flags & FLAG_USERNAME != 0)
                    .then(|| reader.string("username"))
                    .transpose()?;
                let password = (connect_flags & FLAG_PASSWORD != 0)
                    .then(|| reader.bytes().map(<[u8]>::to_vec))
                    .transpose()?;
                Self::Connect(Connect {
                    protocol_name,
                    level,
                    clean_session: connect_flags & FLAG_CLEAN_SESSION != 0,
                    keep_alive,
                    client_id,
                    username,
                    password,
                })
            }
            CONNACK => Self::ConnAck {
                session_present: reader.u8()? & 0x01 != 0,
                code: reader.u8()?,
            },
            PUBLISH => {
                let qos = (flags >> 1) & 0x03;
                let topic = reader.string("topic")?;
                let packet_id = if qos > 0 { Some(reader.u16()?) } else { None };
                Self::Publish(Publish {
                    topic,
                    qos,
                    retain: flags & 0x01 != 0,
                    dup: flags & 0x08 != 0,
                    packet_id,
                    payload: reader.remaining().to_vec(),
                })
            }
            PUBACK => Self::PubAck {
                packet_id: reader.u16()?,
            },
            SUBSCRIBE => {
                let packet_id = reader.u16()?;
                let mut topics = Vec::new();
                while !reader.is_empty() {
                    let topic = reader.string("topic")?;
                    topics.push((topic, reader.u8()?));
                }
                Self::Subscribe { packet_id, topics }
            }
            SUBACK => Self::SubAck {
                packet_id: reader.u16()?,
                codes: reader.remaining().to_vec(),
            },
            UNSUBSCRIBE => {
                let packet_id = reader.u16()?;
                let mut topics = Vec::new();
                while !reader.is_empty() {
                    topics.push(reader.string("topic")?);
                }
                Self::Unsubscribe { packet_id, topics }
            }
            UNSUBACK => Self::UnsubAck {
                packet_id: reader.u16()?,
            },
            PINGREQ => Self::PingReq,
            PINGRESP => Self::PingResp,
            DISCONNECT => Self::Disconnect,
            other => return Err(MqttError::UnsupportedPacket(other)),
        };
        Ok((packet, end))
    }
}

fn read_remaining_length(buf: &[u8]) -> Result<(usize, usize), MqttError> {
    let mut value = 0usize;
    for (i, byte) in buf.iter().enumerate() {
        if i == 4 {
            return Err(MqttError::MalformedLength);
        }
        value |= usize::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if buf.len() >= 4 {
        Err(MqttError::MalformedLength)
    } else {
        Err(MqttError::Truncated)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MqttError> {
        if self.buf.len() < n {
            return Err(MqttError::Truncated);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, MqttError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, MqttError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn bytes(&mut self) -> Result<&'a [u8], MqttError> {
        let len = self.u16()?;
        self.take(usize::from(len))
    }

    fn string(&mut self, what: &'static str) -> Result<String, MqttError> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| MqttError::InvalidUtf8(what))
    }

    fn remaining(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }
}

/// Reassembles packets split across or packed into websocket frames.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    pending: Vec<u8>,
}

impl PacketBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    pub fn next_packet(&mut self) -> Result<Option<Packet>, MqttError> {
        match Packet::decode(&self.pending) {
            Ok((packet, used)) => {
                self.pending.drain(..used);
                Ok(Some(packet))
            }
            Err(MqttError::Truncated) => Ok(None),
            Err(err) => {
                self.pending.clear();
                Err(err)
            }
        }
    }
}

/// Packet ids for QoS 1 publishes and (un)subscribes; never zero.
#[derive(Debug, Default)]
pub struct PacketIds {
    last: u16,
}

impl PacketIds {
    pub fn next_id(&mut self) -> u16 {
        self.last = self.last.checked_add(1).unwrap_or(1);
        self.last
    }
}

#[cfg(test)]
#[path = "../tests/mqtt_tests.rs"]
mod tests;
