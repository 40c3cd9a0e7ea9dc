//! ASN.1 BER codec (definite length form only), as used by LDAPv3.
//!
//! A [`Packet`] is a tag-length-value tree: primitive packets carry one
//! decoded [`BerValue`], constructed packets carry child packets. The codec
//! round-trips every tree it can parse.

use std::fmt::Write as _;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for any single packet, checked before allocation on read and
/// again on encode.
pub const MAX_PACKET_SIZE: usize = 32 << 20; // 32 MiB

pub const TAG_EOC: u32 = 0x00;
pub const TAG_BOOLEAN: u32 = 0x01;
pub const TAG_INTEGER: u32 = 0x02;
pub const TAG_BIT_STRING: u32 = 0x03;
pub const TAG_OCTET_STRING: u32 = 0x04;
pub const TAG_NULL: u32 = 0x05;
pub const TAG_OBJECT_IDENTIFIER: u32 = 0x06;
pub const TAG_ENUMERATED: u32 = 0x0a;
pub const TAG_UTF8_STRING: u32 = 0x0c;
pub const TAG_SEQUENCE: u32 = 0x10;
pub const TAG_SET: u32 = 0x11;
pub const TAG_PRINTABLE_STRING: u32 = 0x13;
pub const TAG_IA5_STRING: u32 = 0x16;

fn universal_tag_name(tag: u32) -> Option<&'static str> {
    Some(match tag {
        TAG_EOC => "EOC",
        TAG_BOOLEAN => "Boolean",
        TAG_INTEGER => "Integer",
        TAG_BIT_STRING => "Bit String",
        TAG_OCTET_STRING => "Octet String",
        TAG_NULL => "NULL",
        TAG_OBJECT_IDENTIFIER => "Object Identifier",
        TAG_ENUMERATED => "Enumerated",
        TAG_UTF8_STRING => "UTF8 String",
        TAG_SEQUENCE => "Sequence",
        TAG_SET => "Set",
        TAG_PRINTABLE_STRING => "Printable String",
        TAG_IA5_STRING => "IA5 String",
        _ => return None,
    })
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BerError {
    /// The buffer ends before the declared packet does. On a streaming
    /// parse this means "need more data".
    #[error("ldap: short packet")]
    ShortPacket,
    #[error("ldap: indefinite form for length not supported")]
    IndefiniteLength,
    #[error("ldap: number of size bytes failed sanity check ({0})")]
    LengthOfLength(usize),
    #[error("ldap: packet larger than max allowed size ({0} bytes)")]
    PacketTooLarge(u64),
    #[error("ldap: high tag numbers not supported")]
    HighTagNumber,
    #[error("ldap: boolean length other than 1 ({0})")]
    InvalidBoolean(usize),
    #[error("ldap: integer wider than 8 bytes ({0})")]
    IntegerTooLarge(usize),
    #[error("ldap: printable string with non-ASCII byte")]
    InvalidPrintableString,
    #[error("ldap: UTF8 string with invalid UTF-8 payload")]
    InvalidUtf8String,
    #[error("ldap: primitive packet without value")]
    MissingValue,
    #[error("ldap: constructed packet with a value")]
    UnexpectedValue,
}

/// BER identifier class (top two bits of the identifier octet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BerClass {
    Universal = 0,
    Application = 1,
    Context = 2,
    Private = 3,
}

impl BerClass {
    fn from_identifier(id: u8) -> BerClass {
        match id >> 6 {
            0 => BerClass::Universal,
            1 => BerClass::Application,
            2 => BerClass::Context,
            _ => BerClass::Private,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BerClass::Universal => "Universal",
            BerClass::Application => "Application",
            BerClass::Context => "Context",
            BerClass::Private => "Private",
        }
    }
}

/// Decoded primitive payload.
///
/// Universal Integer/Enumerated decode to `Int`, Boolean to `Bool`,
/// UTF8String/PrintableString to `Str`. Octet strings, unknown universal
/// tags and every non-Universal primitive stay as raw `Bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BerValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

/// One node of a BER tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub class: BerClass,
    /// true = primitive (has `value`), false = constructed (has `items`).
    pub primitive: bool,
    /// Tag number 0..=30; the high-tag-number form is rejected.
    pub tag: u32,
    pub value: Option<BerValue>,
    pub items: Vec<Packet>,
}

impl Packet {
    pub fn constructed(class: BerClass, tag: u32) -> Packet {
        Packet {
            class,
            primitive: false,
            tag,
            value: None,
            items: Vec::new(),
        }
    }

    pub fn primitive(class: BerClass, tag: u32, value: BerValue) -> Packet {
        Packet {
            class,
            primitive: true,
            tag,
            value: Some(value),
            items: Vec::new(),
        }
    }

    pub fn sequence() -> Packet {
        Packet::constructed(BerClass::Universal, TAG_SEQUENCE)
    }

    pub fn set() -> Packet {
        Packet::constructed(BerClass::Universal, TAG_SET)
    }

    pub fn integer(v: i64) -> Packet {
        Packet::primitive(BerClass::Universal, TAG_INTEGER, BerValue::Int(v))
    }

    pub fn enumerated(v: i64) -> Packet {
        Packet::primitive(BerClass::Universal, TAG_ENUMERATED, BerValue::Int(v))
    }

    pub fn boolean(v: bool) -> Packet {
        Packet::primitive(BerClass::Universal, TAG_BOOLEAN, BerValue::Bool(v))
    }

    pub fn octet_string(v: impl Into<Vec<u8>>) -> Packet {
        Packet::primitive(BerClass::Universal, TAG_OCTET_STRING, BerValue::Bytes(v.into()))
    }

    /// Octet string carrying a string payload (written as its UTF-8 bytes).
    pub fn octet_str(s: impl Into<String>) -> Packet {
        Packet::primitive(BerClass::Universal, TAG_OCTET_STRING, BerValue::Str(s.into()))
    }

    /// Context-class primitive with a raw byte payload.
    pub fn context_bytes(tag: u32, v: impl Into<Vec<u8>>) -> Packet {
        Packet::primitive(BerClass::Context, tag, BerValue::Bytes(v.into()))
    }

    /// Context-class primitive with a string payload.
    pub fn context_str(tag: u32, s: impl Into<String>) -> Packet {
        Packet::primitive(BerClass::Context, tag, BerValue::Str(s.into()))
    }

    /// Append a child and return a reference to it, for nested building.
    pub fn add(&mut self, item: Packet) -> &mut Packet {
        self.items.push(item);
        self.items.last_mut().expect("just pushed")
    }

    /// Append a child, builder style.
    pub fn with(mut self, item: Packet) -> Packet {
        self.items.push(item);
        self
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Some(BerValue::Bool(v)) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.value {
            Some(BerValue::Int(v)) => Some(v),
            _ => None,
        }
    }

    /// String view of the payload: decoded strings directly, raw bytes when
    /// they are valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self.value.as_ref()? {
            BerValue::Str(s) => Some(s),
            BerValue::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self.value.as_ref()? {
            BerValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Parse one packet from the front of `buf`, returning it together with
    /// the number of bytes consumed. [`BerError::ShortPacket`] means the
    /// buffer does not yet hold a complete packet.
    pub fn parse(buf: &[u8]) -> Result<(Packet, usize), BerError> {
        if buf.len() < 2 {
            return Err(BerError::ShortPacket);
        }
        let id = buf[0];
        if id & 0x1f == 0x1f {
            return Err(BerError::HighTagNumber);
        }
        let mut hdr = 2usize;
        let mut data_len = buf[1] as usize;
        if data_len & 0x80 != 0 {
            let n = data_len & 0x7f;
            if n == 0 {
                return Err(BerError::IndefiniteLength);
            }
            if n > 8 {
                return Err(BerError::LengthOfLength(n));
            }
            if buf.len() < 2 + n {
                return Err(BerError::ShortPacket);
            }
            let mut len = 0u64;
            for &b in &buf[2..2 + n] {
                len = (len << 8) | u64::from(b);
            }
            if len > MAX_PACKET_SIZE as u64 {
                return Err(BerError::PacketTooLarge(len));
            }
            data_len = len as usize;
            hdr += n;
        }
        if data_len > buf.len() - hdr {
            return Err(BerError::ShortPacket);
        }
        let data = &buf[hdr..hdr + data_len];

        let mut pkt = Packet {
            class: BerClass::from_identifier(id),
            primitive: id & 0x20 == 0,
            tag: u32::from(id & 0x1f),
            value: None,
            items: Vec::new(),
        };

        if pkt.primitive {
            pkt.value = Some(if pkt.class == BerClass::Universal {
                parse_value(pkt.tag, data)?
            } else {
                BerValue::Bytes(data.to_vec())
            });
        } else {
            let mut rest = data;
            while !rest.is_empty() {
                let (item, n) = Packet::parse(rest)?;
                pkt.items.push(item);
                rest = &rest[n..];
            }
        }

        Ok((pkt, hdr + data_len))
    }

    /// Read exactly one packet from a stream. The header declares the
    /// payload length, so no bytes beyond the packet are consumed.
    pub async fn read<R: AsyncRead + Unpin>(rd: &mut R) -> crate::error::Result<Packet> {
        let mut hdr = [0u8; 10];
        rd.read_exact(&mut hdr[..2]).await?;
        let mut hlen = 2usize;
        let mut data_len = hdr[1] as usize;
        if data_len & 0x80 != 0 {
            let n = data_len & 0x7f;
            if n == 0 {
                return Err(BerError::IndefiniteLength.into());
            }
            if n > 8 {
                return Err(BerError::LengthOfLength(n).into());
            }
            rd.read_exact(&mut hdr[2..2 + n]).await?;
            let mut len = 0u64;
            for &b in &hdr[2..2 + n] {
                len = (len << 8) | u64::from(b);
            }
            if len > MAX_PACKET_SIZE as u64 {
                return Err(BerError::PacketTooLarge(len).into());
            }
            data_len = len as usize;
            hlen += n;
        }
        let mut buf = vec![0u8; hlen + data_len];
        buf[..hlen].copy_from_slice(&hdr[..hlen]);
        rd.read_exact(&mut buf[hlen..]).await?;
        let (pkt, _) = Packet::parse(&buf)?;
        Ok(pkt)
    }

    /// Payload size and total size including identifier and length octets.
    pub fn size(&self) -> Result<(usize, usize), BerError> {
        let payload = if self.primitive {
            match self.value.as_ref().ok_or(BerError::MissingValue)? {
                BerValue::Bytes(b) => b.len(),
                BerValue::Str(s) => s.len(),
                BerValue::Int(v) => int_size(*v),
                BerValue::Bool(_) => 1,
            }
        } else {
            if self.value.is_some() {
                return Err(BerError::UnexpectedValue);
            }
            let mut sum = 0;
            for it in &self.items {
                sum += it.size()?.1;
            }
            sum
        };
        if payload < 128 {
            Ok((payload, payload + 2))
        } else {
            Ok((payload, payload + 2 + length_octets(payload)))
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BerError> {
        let mut out = Vec::with_capacity(self.size()?.1);
        self.encode_into(&mut out)?;
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), BerError> {
        let (payload, total) = self.size()?;
        if total > MAX_PACKET_SIZE {
            return Err(BerError::PacketTooLarge(total as u64));
        }
        if self.tag > 30 {
            return Err(BerError::HighTagNumber);
        }
        let form = if self.primitive { 0 } else { 0x20 };
        out.push(((self.class as u8) << 6) | form | self.tag as u8);
        if payload < 128 {
            out.push(payload as u8);
        } else {
            let n = length_octets(payload);
            out.push(0x80 | n as u8);
            for i in (0..n).rev() {
                out.push((payload >> (8 * i)) as u8);
            }
        }
        if self.primitive {
            match self.value.as_ref().ok_or(BerError::MissingValue)? {
                BerValue::Bytes(b) => out.extend_from_slice(b),
                BerValue::Str(s) => out.extend_from_slice(s.as_bytes()),
                BerValue::Int(v) => {
                    let n = int_size(*v);
                    out.extend_from_slice(&v.to_be_bytes()[8 - n..]);
                }
                BerValue::Bool(b) => out.push(if *b { 0xff } else { 0x00 }),
            }
        } else {
            for it in &self.items {
                it.encode_into(out)?;
            }
        }
        Ok(())
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> crate::error::Result<()> {
        let buf = self.encode()?;
        w.write_all(&buf).await?;
        Ok(())
    }

    /// Human-readable tree dump for debugging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, 0);
        out
    }

    fn dump_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let form = if self.primitive { "Primitive" } else { "Constructed" };
        let _ = write!(out, "{}Class:{} {}", indent, self.class.name(), form);
        match (self.class, universal_tag_name(self.tag)) {
            (BerClass::Universal, Some(name)) => {
                let _ = write!(out, " Tag:{}", name);
            }
            _ => {
                let _ = write!(out, " Tag:{}", self.tag);
            }
        }
        if self.primitive {
            match &self.value {
                Some(BerValue::Bytes(b)) => {
                    let _ = write!(out, " Len:{} Value:", b.len());
                    for byte in b.iter().take(32) {
                        let _ = write!(out, "{:02x}", byte);
                    }
                    if b.len() > 32 {
                        out.push('…');
                    }
                    out.push('\n');
                }
                Some(v) => {
                    let _ = writeln!(out, " Value:{:?}", v);
                }
                None => out.push('\n'),
            }
        } else {
            out.push('\n');
            for it in &self.items {
                it.dump_into(out, depth + 1);
            }
        }
    }
}

/// Number of octets needed for a long-form length.
fn length_octets(len: usize) -> usize {
    let mut n = 0;
    let mut x = len;
    while x != 0 {
        n += 1;
        x >>= 8;
    }
    n
}

/// Minimal number of two's-complement bytes preserving the value.
/// Zero takes one byte.
fn int_size(v: i64) -> usize {
    let b = v.to_be_bytes();
    let mut n = 8;
    while n > 1 {
        let first = b[8 - n];
        let next = b[8 - n + 1];
        if (first == 0x00 && next & 0x80 == 0) || (first == 0xff && next & 0x80 != 0) {
            n -= 1;
        } else {
            break;
        }
    }
    n
}

/// Decode big-endian two's-complement content octets, sign extended.
pub fn decode_integer(data: &[u8]) -> Result<i64, BerError> {
    if data.len() > 8 {
        return Err(BerError::IntegerTooLarge(data.len()));
    }
    if data.is_empty() {
        return Ok(0);
    }
    let mut v: i64 = if data[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in data {
        v = (v << 8) | i64::from(b);
    }
    Ok(v)
}

fn parse_value(tag: u32, data: &[u8]) -> Result<BerValue, BerError> {
    match tag {
        TAG_BOOLEAN => {
            if data.len() != 1 {
                return Err(BerError::InvalidBoolean(data.len()));
            }
            Ok(BerValue::Bool(data[0] != 0))
        }
        TAG_INTEGER | TAG_ENUMERATED => Ok(BerValue::Int(decode_integer(data)?)),
        TAG_PRINTABLE_STRING => {
            if data.iter().any(|&b| b >= 0x80) {
                return Err(BerError::InvalidPrintableString);
            }
            Ok(BerValue::Str(
                data.iter().map(|&b| b as char).collect::<String>(),
            ))
        }
        TAG_UTF8_STRING => Ok(BerValue::Str(
            String::from_utf8(data.to_vec()).map_err(|_| BerError::InvalidUtf8String)?,
        )),
        _ => Ok(BerValue::Bytes(data.to_vec())),
    }
}
