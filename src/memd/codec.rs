//! Frame decoding and encoding.

use super::{Command, Magic, Packet, Status, HEADER_SIZE};
use bytes::{BufMut, Bytes, BytesMut};

/// Largest body a frame may declare.
pub const MAX_BODY_SIZE: usize = 20 * 1024 * 1024;

/// Result of attempting to decode one frame.
#[derive(Debug)]
pub enum DecodeResult {
    /// A complete packet and the number of bytes it occupied.
    Complete(Packet, usize),
    /// More data is needed.
    Incomplete,
    /// The frame is well-formed but its opcode is not one we model.
    Unsupported {
        magic: Magic,
        opcode: u8,
        opaque: u32,
        consumed: usize,
    },
    /// The bytes cannot be framed.
    Invalid(String),
}

/// Parsed header fields.
#[derive(Debug, Clone, Copy)]
struct Header {
    magic: Magic,
    opcode: u8,
    framing_extras_length: u8,
    key_length: u16,
    extras_length: u8,
    datatype: u8,
    vbucket_or_status: u16,
    total_body_length: u32,
    opaque: u32,
    cas: u64,
}

impl Header {
    fn parse(data: &[u8]) -> Result<Self, String> {
        if data.len() < HEADER_SIZE {
            return Err("header too short".to_string());
        }

        let magic =
            Magic::try_from(data[0]).map_err(|m| format!("invalid magic: 0x{:02x}", m))?;

        let (framing_extras_length, key_length) = if magic.is_extended() {
            (data[2], data[3] as u16)
        } else {
            (0, u16::from_be_bytes([data[2], data[3]]))
        };

        Ok(Self {
            magic,
            opcode: data[1],
            framing_extras_length,
            key_length,
            extras_length: data[4],
            datatype: data[5],
            vbucket_or_status: u16::from_be_bytes([data[6], data[7]]),
            total_body_length: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            opaque: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            cas: u64::from_be_bytes([
                data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
            ]),
        })
    }
}

/// Decode one frame from the front of `data`.
pub fn decode(data: &[u8]) -> DecodeResult {
    if data.len() < HEADER_SIZE {
        return DecodeResult::Incomplete;
    }

    let header = match Header::parse(data) {
        Ok(h) => h,
        Err(e) => return DecodeResult::Invalid(e),
    };

    if header.total_body_length as usize > MAX_BODY_SIZE {
        return DecodeResult::Invalid(format!(
            "body length {} exceeds limit {}",
            header.total_body_length, MAX_BODY_SIZE
        ));
    }

    let total_size = HEADER_SIZE + header.total_body_length as usize;
    if data.len() < total_size {
        return DecodeResult::Incomplete;
    }

    let framing_end = header.framing_extras_length as usize;
    let extras_end = framing_end + header.extras_length as usize;
    let key_end = extras_end + header.key_length as usize;
    if key_end > header.total_body_length as usize {
        return DecodeResult::Invalid(format!(
            "body length {} shorter than framing+extras+key {}",
            header.total_body_length, key_end
        ));
    }

    let command = match Command::try_from(header.opcode) {
        Ok(c) => c,
        Err(opcode) => {
            return DecodeResult::Unsupported {
                magic: header.magic,
                opcode,
                opaque: header.opaque,
                consumed: total_size,
            }
        }
    };

    let (vbucket, status) = if header.magic.is_request() {
        (header.vbucket_or_status, Status::Success)
    } else {
        match Status::try_from(header.vbucket_or_status) {
            Ok(s) => (0, s),
            Err(s) => return DecodeResult::Invalid(format!("unknown status: 0x{:04x}", s)),
        }
    };

    let body = &data[HEADER_SIZE..total_size];
    let packet = Packet {
        magic: header.magic,
        command,
        datatype: header.datatype,
        vbucket,
        status,
        opaque: header.opaque,
        cas: header.cas,
        framing_extras: Bytes::copy_from_slice(&body[..framing_end]),
        extras: Bytes::copy_from_slice(&body[framing_end..extras_end]),
        key: Bytes::copy_from_slice(&body[extras_end..key_end]),
        value: Bytes::copy_from_slice(&body[key_end..]),
    };

    DecodeResult::Complete(packet, total_size)
}

/// Encode a packet into `buf`.
///
/// The magic is chosen from the packet direction and whether framing extras
/// are present.
pub fn encode(packet: &Packet, buf: &mut BytesMut) {
    let extended = !packet.framing_extras.is_empty();
    let magic = match (packet.magic.is_request(), extended) {
        (true, false) => Magic::Req,
        (true, true) => Magic::ReqExt,
        (false, false) => Magic::Res,
        (false, true) => Magic::ResExt,
    };
    let vbucket_or_status = if magic.is_request() {
        packet.vbucket
    } else {
        u16::from(packet.status)
    };

    write_frame(
        buf,
        magic,
        packet.command as u8,
        packet.datatype,
        vbucket_or_status,
        packet.opaque,
        packet.cas,
        [
            &packet.framing_extras[..],
            &packet.extras[..],
            &packet.key[..],
            &packet.value[..],
        ],
    );
}

/// Encode a bodiless response for an opcode outside [`Command`].
pub fn encode_raw_status(buf: &mut BytesMut, opcode: u8, opaque: u32, status: Status) {
    let empty: &[u8] = &[];
    write_frame(
        buf,
        Magic::Res,
        opcode,
        0,
        u16::from(status),
        opaque,
        0,
        [empty; 4],
    );
}

#[allow(clippy::too_many_arguments)]
fn write_frame(
    buf: &mut BytesMut,
    magic: Magic,
    opcode: u8,
    datatype: u8,
    vbucket_or_status: u16,
    opaque: u32,
    cas: u64,
    [framing_extras, extras, key, value]: [&[u8]; 4],
) {
    let total_body_len = framing_extras.len() + extras.len() + key.len() + value.len();
    buf.reserve(HEADER_SIZE + total_body_len);

    buf.put_u8(magic as u8);
    buf.put_u8(opcode);
    if magic.is_extended() {
        buf.put_u8(framing_extras.len() as u8);
        buf.put_u8(key.len() as u8);
    } else {
        buf.put_u16(key.len() as u16);
    }
    buf.put_u8(extras.len() as u8);
    buf.put_u8(datatype);
    buf.put_u16(vbucket_or_status);
    buf.put_u32(total_body_len as u32);
    buf.put_u32(opaque);
    buf.put_u64(cas);

    buf.extend_from_slice(framing_extras);
    buf.extend_from_slice(extras);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
}
