//! Wire framing and message (de)serialisation. Every message is
//! `magic(4) | command[12 zero-padded] | len(u32) | [checksum(4) if ver>=209]
//! | payload(len)`, little-endian throughout. The checksum is the first 4
//! bytes of SHA-256d of the payload.
//!
//! This module only knows how to turn bytes into a `Message` and back; it
//! has no opinion on what a peer should do with one — that's the filter
//! pipeline's job.

use coin_core::encoding::{read_var_bytes, read_varint, write_var_bytes, write_varint};
use coin_core::{Block, BlockLocator, Transaction};
use coin_primitives::hash::Hash256;

/// Below this protocol version, messages carry no checksum.
pub const CHECKSUM_VERSION: u32 = 209;
/// Below this version, `addr` entries carry no per-entry timestamp.
pub const ADDR_TIME_VERSION: u32 = 31402;
/// Below this version, `ping`/`pong` are not exchanged.
pub const BIP0031_VERSION: u32 = 60000;

const HEADER_COMMAND_LEN: usize = 12;
pub const MAX_MESSAGE_PAYLOAD: u32 = 32 * 1024 * 1024;

/// A network address as carried in `version` and `addr` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddr {
    pub services: u64,
    /// IPv4 addresses are stored IPv4-mapped (`::ffff:a.b.c.d`).
    pub ip: [u8; 16],
    pub port: u16,
}

impl NetAddr {
    #[must_use]
    pub fn new_v4(services: u64, a: u8, b: u8, c: u8, d: u8, port: u16) -> Self {
        let mut ip = [0u8; 16];
        ip[10] = 0xff;
        ip[11] = 0xff;
        ip[12] = a;
        ip[13] = b;
        ip[14] = c;
        ip[15] = d;
        Self { services, ip, port }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&self.ip);
        out.extend_from_slice(&self.port.to_be_bytes());
    }

    fn decode(data: &[u8], pos: &mut usize) -> Option<Self> {
        let services = u64::from_le_bytes(data.get(*pos..*pos + 8)?.try_into().ok()?);
        *pos += 8;
        let mut ip = [0u8; 16];
        ip.copy_from_slice(data.get(*pos..*pos + 16)?);
        *pos += 16;
        let port = u16::from_be_bytes(data.get(*pos..*pos + 2)?.try_into().ok()?);
        *pos += 2;
        Some(Self { services, ip, port })
    }
}

/// A timestamped address, the unit carried in `addr` messages at or above
/// `ADDR_TIME_VERSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampedAddr {
    pub time: u32,
    pub addr: NetAddr,
}

/// `inv`/`getdata` inventory kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvType {
    Error,
    Tx,
    Block,
    Share,
    FilteredBlock,
}

impl InvType {
    fn to_u32(self) -> u32 {
        match self {
            InvType::Error => 0,
            InvType::Tx => 1,
            InvType::Block => 2,
            InvType::Share => 3,
            InvType::FilteredBlock => 4,
        }
    }

    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(InvType::Error),
            1 => Some(InvType::Tx),
            2 => Some(InvType::Block),
            3 => Some(InvType::Share),
            4 => Some(InvType::FilteredBlock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inventory {
    pub kind: InvType,
    pub hash: Hash256,
}

impl Inventory {
    #[must_use]
    pub fn block(hash: Hash256) -> Self {
        Self { kind: InvType::Block, hash }
    }

    #[must_use]
    pub fn tx(hash: Hash256) -> Self {
        Self { kind: InvType::Tx, hash }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.kind.to_u32().to_le_bytes());
        out.extend_from_slice(self.hash.as_bytes());
    }

    fn decode(data: &[u8], pos: &mut usize) -> Option<Self> {
        let kind = u32::from_le_bytes(data.get(*pos..*pos + 4)?.try_into().ok()?);
        *pos += 4;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(data.get(*pos..*pos + 32)?);
        *pos += 32;
        Some(Self {
            kind: InvType::from_u32(kind)?,
            hash: Hash256::from_bytes(hash),
        })
    }
}

/// The subset of filter commands `filterload`/`filteradd`/`filterclear`
/// actually take a payload (`filterclear` does not).
#[derive(Debug, Clone)]
pub enum Message {
    Version {
        version: u32,
        services: u64,
        timestamp: i64,
        addr_recv: NetAddr,
        addr_from: NetAddr,
        nonce: u64,
        user_agent: String,
        start_height: i32,
    },
    VerAck,
    Addr(Vec<TimestampedAddr>),
    Inv(Vec<Inventory>),
    GetData(Vec<Inventory>),
    GetBlocks { locator: BlockLocator, hash_stop: Hash256 },
    GetHeaders { locator: BlockLocator, hash_stop: Hash256 },
    Tx(Transaction),
    Block(Block),
    Headers(Vec<coin_core::BlockHeader>),
    GetAddr,
    Ping(u64),
    Pong(u64),
    Alert { payload: Vec<u8>, signature: Vec<u8> },
    MemPool,
    FilterLoad(Vec<u8>),
    FilterAdd(Vec<u8>),
    FilterClear,
}

impl Message {
    #[must_use]
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version { .. } => "version",
            Message::VerAck => "verack",
            Message::Addr(_) => "addr",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::GetBlocks { .. } => "getblocks",
            Message::GetHeaders { .. } => "getheaders",
            Message::Tx(_) => "tx",
            Message::Block(_) => "block",
            Message::Headers(_) => "headers",
            Message::GetAddr => "getaddr",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Alert { .. } => "alert",
            Message::MemPool => "mempool",
            Message::FilterLoad(_) => "filterload",
            Message::FilterAdd(_) => "filteradd",
            Message::FilterClear => "filterclear",
        }
    }

    /// Encodes just the payload (no framing); `encode_frame` wraps this.
    fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Message::Version {
                version,
                services,
                timestamp,
                addr_recv,
                addr_from,
                nonce,
                user_agent,
                start_height,
            } => {
                buf.extend_from_slice(&version.to_le_bytes());
                buf.extend_from_slice(&services.to_le_bytes());
                buf.extend_from_slice(&timestamp.to_le_bytes());
                addr_recv.encode(&mut buf);
                addr_from.encode(&mut buf);
                buf.extend_from_slice(&nonce.to_le_bytes());
                write_var_bytes(&mut buf, user_agent.as_bytes());
                buf.extend_from_slice(&start_height.to_le_bytes());
            }
            Message::VerAck | Message::GetAddr | Message::MemPool | Message::FilterClear => {}
            Message::Addr(addrs) => {
                write_varint(&mut buf, addrs.len() as u64);
                for a in addrs {
                    buf.extend_from_slice(&a.time.to_le_bytes());
                    a.addr.encode(&mut buf);
                }
            }
            Message::Inv(items) | Message::GetData(items) => {
                write_varint(&mut buf, items.len() as u64);
                for item in items {
                    item.encode(&mut buf);
                }
            }
            Message::GetBlocks { locator, hash_stop } | Message::GetHeaders { locator, hash_stop } => {
                write_varint(&mut buf, locator.have.len() as u64);
                for h in &locator.have {
                    buf.extend_from_slice(h.as_bytes());
                }
                buf.extend_from_slice(hash_stop.as_bytes());
            }
            Message::Tx(tx) => buf.extend_from_slice(&tx.serialize()),
            Message::Block(block) => buf.extend_from_slice(&block.serialize()),
            Message::Headers(headers) => {
                write_varint(&mut buf, headers.len() as u64);
                for h in headers {
                    buf.extend_from_slice(&h.serialize());
                    buf.push(0); // zero-length transaction count, as upstream `headers` does
                }
            }
            Message::Ping(nonce) | Message::Pong(nonce) => {
                buf.extend_from_slice(&nonce.to_le_bytes());
            }
            Message::Alert { payload, signature } => {
                write_var_bytes(&mut buf, payload);
                write_var_bytes(&mut buf, signature);
            }
            Message::FilterLoad(data) | Message::FilterAdd(data) => {
                write_var_bytes(&mut buf, data);
            }
        }
        buf
    }

    /// Decodes a payload for the given command, per-chain protocol version
    /// (only `addr`'s per-entry timestamp depends on it).
    pub fn decode_payload(command: &str, data: &[u8], protocol_version: u32) -> Option<Message> {
        let mut pos = 0usize;
        match command {
            "version" => {
                let version = u32::from_le_bytes(data.get(0..4)?.try_into().ok()?);
                let services = u64::from_le_bytes(data.get(4..12)?.try_into().ok()?);
                let timestamp = i64::from_le_bytes(data.get(12..20)?.try_into().ok()?);
                pos = 20;
                let addr_recv = NetAddr::decode(data, &mut pos)?;
                let addr_from = NetAddr::decode(data, &mut pos)?;
                let nonce = u64::from_le_bytes(data.get(pos..pos + 8)?.try_into().ok()?);
                pos += 8;
                let user_agent = String::from_utf8(read_var_bytes(data, &mut pos)?).ok()?;
                let start_height = i32::from_le_bytes(data.get(pos..pos + 4)?.try_into().ok()?);
                Some(Message::Version {
                    version,
                    services,
                    timestamp,
                    addr_recv,
                    addr_from,
                    nonce,
                    user_agent,
                    start_height,
                })
            }
            "verack" => Some(Message::VerAck),
            "getaddr" => Some(Message::GetAddr),
            "mempool" => Some(Message::MemPool),
            "filterclear" => Some(Message::FilterClear),
            "addr" => {
                let count = read_varint(data, &mut pos)?;
                let mut addrs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let time = if protocol_version >= ADDR_TIME_VERSION {
                        let t = u32::from_le_bytes(data.get(pos..pos + 4)?.try_into().ok()?);
                        pos += 4;
                        t
                    } else {
                        0
                    };
                    let addr = NetAddr::decode(data, &mut pos)?;
                    addrs.push(TimestampedAddr { time, addr });
                }
                Some(Message::Addr(addrs))
            }
            "inv" | "getdata" => {
                let count = read_varint(data, &mut pos)?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(Inventory::decode(data, &mut pos)?);
                }
                Some(if command == "inv" {
                    Message::Inv(items)
                } else {
                    Message::GetData(items)
                })
            }
            "getblocks" | "getheaders" => {
                let count = read_varint(data, &mut pos)?;
                let mut have = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let mut h = [0u8; 32];
                    h.copy_from_slice(data.get(pos..pos + 32)?);
                    pos += 32;
                    have.push(Hash256::from_bytes(h));
                }
                let mut stop_bytes = [0u8; 32];
                stop_bytes.copy_from_slice(data.get(pos..pos + 32)?);
                let hash_stop = Hash256::from_bytes(stop_bytes);
                let locator = BlockLocator { have };
                Some(if command == "getblocks" {
                    Message::GetBlocks { locator, hash_stop }
                } else {
                    Message::GetHeaders { locator, hash_stop }
                })
            }
            "tx" => Transaction::deserialize(data).map(Message::Tx),
            "block" => Block::deserialize(data).map(Message::Block),
            "ping" => Some(Message::Ping(u64::from_le_bytes(data.get(0..8)?.try_into().ok()?))),
            "pong" => Some(Message::Pong(u64::from_le_bytes(data.get(0..8)?.try_into().ok()?))),
            "alert" => {
                let payload = read_var_bytes(data, &mut pos)?;
                let signature = read_var_bytes(data, &mut pos)?;
                Some(Message::Alert { payload, signature })
            }
            "filterload" => Some(Message::FilterLoad(read_var_bytes(data, &mut pos)?)),
            "filteradd" => Some(Message::FilterAdd(read_var_bytes(data, &mut pos)?)),
            _ => None,
        }
    }
}

/// Encodes a complete framed message, including the checksum
/// when `protocol_version >= CHECKSUM_VERSION`.
#[must_use]
pub fn encode_frame(magic: [u8; 4], message: &Message, protocol_version: u32) -> Vec<u8> {
    let payload = message.encode_payload();
    let mut out = Vec::with_capacity(4 + HEADER_COMMAND_LEN + 4 + 4 + payload.len());
    out.extend_from_slice(&magic);
    let mut command_bytes = [0u8; HEADER_COMMAND_LEN];
    let cmd = message.command().as_bytes();
    command_bytes[..cmd.len()].copy_from_slice(cmd);
    out.extend_from_slice(&command_bytes);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    if protocol_version >= CHECKSUM_VERSION {
        let checksum = Hash256::double_sha256(&payload);
        out.extend_from_slice(&checksum.as_bytes()[..4]);
    }
    out.extend_from_slice(&payload);
    out
}

/// A parsed header, enough to know how many more bytes to read for the
/// payload and to validate the checksum once it arrives.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub magic: [u8; 4],
    pub command: String,
    pub length: u32,
    pub checksum: Option<[u8; 4]>,
}

impl FrameHeader {
    #[must_use]
    pub fn wire_len(protocol_version: u32) -> usize {
        if protocol_version >= CHECKSUM_VERSION {
            4 + HEADER_COMMAND_LEN + 4 + 4
        } else {
            4 + HEADER_COMMAND_LEN + 4
        }
    }

    /// Parses a header from exactly `wire_len(protocol_version)` bytes.
    #[must_use]
    pub fn parse(data: &[u8], protocol_version: u32) -> Option<Self> {
        let mut pos = 0;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(data.get(pos..pos + 4)?);
        pos += 4;
        let command_bytes = data.get(pos..pos + HEADER_COMMAND_LEN)?;
        pos += HEADER_COMMAND_LEN;
        let end = command_bytes.iter().position(|&b| b == 0).unwrap_or(command_bytes.len());
        let command = String::from_utf8(command_bytes[..end].to_vec()).ok()?;
        let length = u32::from_le_bytes(data.get(pos..pos + 4)?.try_into().ok()?);
        pos += 4;
        let checksum = if protocol_version >= CHECKSUM_VERSION {
            let mut c = [0u8; 4];
            c.copy_from_slice(data.get(pos..pos + 4)?);
            Some(c)
        } else {
            None
        };
        Some(Self { magic, command, length, checksum })
    }

    /// Verifies the payload's checksum against the header, when present.
    #[must_use]
    pub fn checksum_matches(&self, payload: &[u8]) -> bool {
        match self.checksum {
            None => true,
            Some(expected) => Hash256::double_sha256(payload).as_bytes()[..4] == expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_message_round_trips() {
        let msg = Message::Version {
            version: 70002,
            services: 1,
            timestamp: 1_700_000_000,
            addr_recv: NetAddr::new_v4(1, 127, 0, 0, 1, 8333),
            addr_from: NetAddr::new_v4(1, 10, 0, 0, 1, 8333),
            nonce: 0xdead_beef,
            user_agent: "/libcoin:0.1/".to_string(),
            start_height: 42,
        };
        let frame = encode_frame([0xF9, 0xBE, 0xB4, 0xD9], &msg, 70002);
        let header_len = FrameHeader::wire_len(70002);
        let header = FrameHeader::parse(&frame[..header_len], 70002).unwrap();
        assert_eq!(header.command, "version");
        let payload = &frame[header_len..header_len + header.length as usize];
        assert!(header.checksum_matches(payload));
        let decoded = Message::decode_payload(&header.command, payload, 70002).unwrap();
        match decoded {
            Message::Version { nonce, start_height, .. } => {
                assert_eq!(nonce, 0xdead_beef);
                assert_eq!(start_height, 42);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let msg = Message::Ping(7);
        let frame = encode_frame([0xF9, 0xBE, 0xB4, 0xD9], &msg, 70002);
        let header_len = FrameHeader::wire_len(70002);
        let header = FrameHeader::parse(&frame[..header_len], 70002).unwrap();
        let mut payload = frame[header_len..header_len + header.length as usize].to_vec();
        payload[0] ^= 0xFF;
        assert!(!header.checksum_matches(&payload));
    }

    #[test]
    fn pre_checksum_version_omits_the_checksum_field() {
        let msg = Message::VerAck;
        let frame = encode_frame([0xF9, 0xBE, 0xB4, 0xD9], &msg, 100);
        assert_eq!(frame.len(), FrameHeader::wire_len(100));
        let header = FrameHeader::parse(&frame, 100).unwrap();
        assert!(header.checksum.is_none());
        assert_eq!(header.length, 0);
    }

    #[test]
    fn inventory_round_trips_through_inv_message() {
        let items = vec![Inventory::block(Hash256::double_sha256(b"a")), Inventory::tx(Hash256::double_sha256(b"b"))];
        let msg = Message::Inv(items.clone());
        let payload = msg.encode_payload();
        let decoded = Message::decode_payload("inv", &payload, 70002).unwrap();
        match decoded {
            Message::Inv(got) => assert_eq!(got, items),
            _ => panic!("wrong variant"),
        }
    }
}
