//! ZKTeco TCP wire format: framing, command codes and record decoders.
//!
//! A frame is an 8-byte prefix (`50 50 82 7d` + u32 LE payload length)
//! followed by an 8-byte header `{command, checksum, session_id, reply_id}`
//! (u16 LE each) and the command data.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::domain::models::{RawPunch, UserRecord};

pub mod cmd {
    pub const CMD_CONNECT: u16 = 1000;
    pub const CMD_EXIT: u16 = 1001;
    pub const CMD_ENABLEDEVICE: u16 = 1002;
    pub const CMD_DISABLEDEVICE: u16 = 1003;
    pub const CMD_AUTH: u16 = 1102;
    pub const CMD_PREPARE_DATA: u16 = 1500;
    pub const CMD_DATA: u16 = 1501;
    pub const CMD_FREE_DATA: u16 = 1502;
    pub const CMD_DATA_WRRQ: u16 = 1503;
    pub const CMD_DATA_RDY: u16 = 1504;
    pub const CMD_USERTEMP_RRQ: u16 = 9;
    pub const CMD_ATTLOG_RRQ: u16 = 13;
    pub const CMD_GET_FREE_SIZES: u16 = 50;
    pub const CMD_REG_EVENT: u16 = 500;

    pub const CMD_ACK_OK: u16 = 2000;
    pub const CMD_ACK_UNAUTH: u16 = 2005;
}

pub const USHRT_MAX: u32 = 65535;
pub const MAX_CHUNK: u32 = 0xFFC0;
pub const FRAME_MAGIC: [u8; 4] = [0x50, 0x50, 0x82, 0x7d];
pub const FRAME_PREFIX_LEN: usize = 8;
pub const HEADER_LEN: usize = 8;
/// Largest payload a terminal sends in one frame: a full chunk plus header slack.
pub const MAX_FRAME_LEN: usize = MAX_CHUNK as usize + HEADER_LEN + 8;

const FCT_USER: i32 = 5;
const COMM_KEY_TICKS: u8 = 50;

pub const TCP_USER_RECORD_SIZE: usize = 72;
pub const TCP_ATTENDANCE_RECORD_SIZE: usize = 40;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame does not start with the ZK magic bytes")]
    BadMagic,
    #[error("packet truncated: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("frame announces {length} bytes, more than the {max} byte limit")]
    Oversized { length: usize, max: usize },
    #[error("unsupported {kind} record size {size}")]
    UnsupportedRecordSize { kind: &'static str, size: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: u16,
    pub checksum: u16,
    pub session_id: u16,
    pub reply_id: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreeSizes {
    pub users: u32,
    pub records: u32,
}

pub fn next_reply_id(reply_id: u16) -> u16 {
    ((reply_id as u32 + 1) % USHRT_MAX) as u16
}

/// 16-bit ones'-complement sum, folded at 65535.
pub fn checksum(buf: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut pairs = buf.chunks_exact(2);
    for pair in &mut pairs {
        sum += u16::from_le_bytes([pair[0], pair[1]]) as u32;
        if sum > USHRT_MAX {
            sum -= USHRT_MAX;
        }
    }
    if let [last] = pairs.remainder() {
        sum += *last as u32;
    }
    while sum > USHRT_MAX {
        sum -= USHRT_MAX;
    }

    let mut value = !(sum as i64);
    while value < 0 {
        value += USHRT_MAX as i64;
    }
    value as u16
}

/// Builds a TCP frame. The checksum is taken over the header carrying the
/// previous `reply_id`; the wire header carries the incremented one, which is
/// what the terminals expect.
pub fn encode_packet(command: u16, session_id: u16, reply_id: u16, data: &[u8]) -> Vec<u8> {
    let mut inner = Vec::with_capacity(HEADER_LEN + data.len());
    inner.extend_from_slice(&command.to_le_bytes());
    inner.extend_from_slice(&[0, 0]);
    inner.extend_from_slice(&session_id.to_le_bytes());
    inner.extend_from_slice(&reply_id.to_le_bytes());
    inner.extend_from_slice(data);

    let sum = checksum(&inner);
    inner[2..4].copy_from_slice(&sum.to_le_bytes());
    inner[6..8].copy_from_slice(&next_reply_id(reply_id).to_le_bytes());

    let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN + inner.len());
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&(inner.len() as u32).to_le_bytes());
    frame.extend_from_slice(&inner);
    frame
}

/// Returns the payload length announced by a frame prefix, bounded by
/// [`MAX_FRAME_LEN`].
pub fn decode_frame_prefix(prefix: &[u8; FRAME_PREFIX_LEN]) -> Result<usize, ProtocolError> {
    if prefix[0..4] != FRAME_MAGIC {
        return Err(ProtocolError::BadMagic);
    }
    let length = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;
    if length > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized {
            length,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(length)
}

pub fn decode_packet(payload: &[u8]) -> Result<Packet, ProtocolError> {
    if payload.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            expected: HEADER_LEN,
            actual: payload.len(),
        });
    }

    Ok(Packet {
        command: read_u16(payload, 0),
        checksum: read_u16(payload, 2),
        session_id: read_u16(payload, 4),
        reply_id: read_u16(payload, 6),
        data: payload[HEADER_LEN..].to_vec(),
    })
}

/// Data for `CMD_DATA_WRRQ`: `{1u8, table command u16, fct i32, ext i32}`.
pub fn prepare_buffer_request(command: u16, fct: i32, ext: i32) -> [u8; 11] {
    let mut buf = [0_u8; 11];
    buf[0] = 1;
    buf[1..3].copy_from_slice(&command.to_le_bytes());
    buf[3..7].copy_from_slice(&fct.to_le_bytes());
    buf[7..11].copy_from_slice(&ext.to_le_bytes());
    buf
}

pub fn users_buffer_request() -> [u8; 11] {
    prepare_buffer_request(cmd::CMD_USERTEMP_RRQ, FCT_USER, 0)
}

pub fn attendance_buffer_request() -> [u8; 11] {
    prepare_buffer_request(cmd::CMD_ATTLOG_RRQ, 0, 0)
}

pub fn chunk_request(start: u32, size: u32) -> [u8; 8] {
    let mut buf = [0_u8; 8];
    buf[0..4].copy_from_slice(&start.to_le_bytes());
    buf[4..8].copy_from_slice(&size.to_le_bytes());
    buf
}

/// Scrambles the numeric comm key with the session id for `CMD_AUTH`.
pub fn make_comm_key(key: u32, session_id: u16) -> [u8; 4] {
    let mixed = key.reverse_bits().wrapping_add(session_id as u32);
    let b = mixed.to_le_bytes();
    let salted = [b[0] ^ b'Z', b[1] ^ b'K', b[2] ^ b'S', b[3] ^ b'O'];
    let swapped = [salted[2], salted[3], salted[0], salted[1]];
    let ticks = COMM_KEY_TICKS;
    [swapped[0] ^ ticks, swapped[1] ^ ticks, ticks, swapped[3] ^ ticks]
}

/// Device timestamps count seconds in a calendar of 31-day months since 2000.
pub fn decode_time(mut value: u32) -> Option<NaiveDateTime> {
    let second = value % 60;
    value /= 60;
    let minute = value % 60;
    value /= 60;
    let hour = value % 24;
    value /= 24;
    let day = value % 31 + 1;
    value /= 31;
    let month = value % 12 + 1;
    value /= 12;
    let year = value as i32 + 2000;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

#[cfg(test)]
pub(crate) fn encode_time(timestamp: &NaiveDateTime) -> u32 {
    use chrono::{Datelike, Timelike};

    let days = (timestamp.year() as u32 % 100) * 12 * 31
        + (timestamp.month() - 1) * 31
        + timestamp.day()
        - 1;
    days * 24 * 60 * 60
        + (timestamp.hour() * 60 + timestamp.minute()) * 60
        + timestamp.second()
}

pub fn decode_free_sizes(data: &[u8]) -> FreeSizes {
    if data.len() < 80 {
        return FreeSizes::default();
    }
    FreeSizes {
        users: read_u32(data, 16),
        records: read_u32(data, 32),
    }
}

/// Decodes a user table buffer (u32 LE total size followed by records).
pub fn decode_users(buffer: &[u8], user_count: u32) -> Result<Vec<UserRecord>, ProtocolError> {
    let Some((records, size)) = split_table(buffer, user_count, TCP_USER_RECORD_SIZE) else {
        return Ok(Vec::new());
    };

    let decode: fn(&[u8]) -> UserRecord = match size {
        28 => decode_user_28,
        72 => decode_user_72,
        _ => {
            return Err(ProtocolError::UnsupportedRecordSize { kind: "user", size });
        }
    };

    Ok(records.chunks_exact(size).map(decode).collect())
}

/// Size of one record in an attendance table buffer, if the table is non-empty.
pub fn attendance_record_size(buffer: &[u8], record_count: u32) -> Option<usize> {
    split_table(buffer, record_count, TCP_ATTENDANCE_RECORD_SIZE).map(|(_, size)| size)
}

/// Decodes an attendance table buffer. Records whose timestamp is not a real
/// calendar date are skipped.
///
/// 8-byte records only carry the internal uid; `roster` maps it back to the
/// user id, and the uid itself is used when no user matches.
pub fn decode_attendance(
    buffer: &[u8],
    record_count: u32,
    roster: &[UserRecord],
) -> Result<Vec<RawPunch>, ProtocolError> {
    let Some((records, size)) = split_table(buffer, record_count, TCP_ATTENDANCE_RECORD_SIZE)
    else {
        return Ok(Vec::new());
    };

    let decode: fn(&[u8]) -> Option<RawPunch> = match size {
        8 => decode_attendance_8,
        16 => decode_attendance_16,
        40 => decode_attendance_40,
        _ => {
            return Err(ProtocolError::UnsupportedRecordSize {
                kind: "attendance",
                size,
            });
        }
    };

    let mut punches = Vec::new();
    for (index, record) in records.chunks_exact(size).enumerate() {
        match decode(record) {
            Some(punch) => punches.push(punch),
            None => tracing::warn!(index, "skipping attendance record with invalid timestamp"),
        }
    }

    if size == 8 && !roster.is_empty() {
        let by_uid: HashMap<String, &str> = roster
            .iter()
            .map(|user| (user.uid.to_string(), user.user_id.as_str()))
            .collect();
        for punch in &mut punches {
            if let Some(user_id) = by_uid.get(&punch.user_id) {
                punch.user_id = (*user_id).to_string();
            }
        }
    }

    Ok(punches)
}

fn split_table(buffer: &[u8], count: u32, default_size: usize) -> Option<(&[u8], usize)> {
    if buffer.len() < 4 {
        return None;
    }
    let total = (read_u32(buffer, 0) as usize).min(buffer.len() - 4);
    if total == 0 {
        return None;
    }

    let size = match count as usize {
        0 => default_size,
        count if total % count == 0 => total / count,
        _ => default_size,
    };
    Some((&buffer[4..4 + total], size))
}

fn decode_user_28(record: &[u8]) -> UserRecord {
    let user_id = read_u32(record, 24).to_string();
    UserRecord {
        uid: read_u16(record, 0),
        privilege: record[2],
        password: read_string(&record[3..8]),
        name: display_name(read_string(&record[8..16]), &user_id),
        group_id: record[21].to_string(),
        user_id,
    }
}

fn decode_user_72(record: &[u8]) -> UserRecord {
    let user_id = read_string(&record[48..72]);
    UserRecord {
        uid: read_u16(record, 0),
        privilege: record[2],
        password: read_string(&record[3..11]),
        name: display_name(read_string(&record[11..35]), &user_id),
        group_id: read_string(&record[40..47]),
        user_id,
    }
}

fn display_name(name: String, user_id: &str) -> String {
    if name.is_empty() {
        format!("NN-{user_id}")
    } else {
        name
    }
}

// Carries the uid in the user id slot until `decode_attendance` resolves it.
fn decode_attendance_8(record: &[u8]) -> Option<RawPunch> {
    Some(RawPunch {
        user_id: read_u16(record, 0).to_string(),
        verify_state: record[2],
        timestamp: decode_time(read_u32(record, 3))?,
        punch_code: record[7],
    })
}

fn decode_attendance_16(record: &[u8]) -> Option<RawPunch> {
    Some(RawPunch {
        user_id: read_u32(record, 0).to_string(),
        timestamp: decode_time(read_u32(record, 4))?,
        verify_state: record[8],
        punch_code: record[9],
    })
}

fn decode_attendance_40(record: &[u8]) -> Option<RawPunch> {
    Some(RawPunch {
        user_id: read_string(&record[2..26]),
        verify_state: record[26],
        timestamp: decode_time(read_u32(record, 27))?,
        punch_code: record[31],
    })
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).trim().to_string()
}
