// Data frame wire layout, alignment helpers, and term length limits.
use crate::core::error::{Error, ErrorKind};

pub const FRAME_LENGTH_FIELD_OFFSET: usize = 0;
pub const VERSION_FIELD_OFFSET: usize = 4;
pub const FLAGS_FIELD_OFFSET: usize = 5;
pub const TYPE_FIELD_OFFSET: usize = 6;
pub const TERM_OFFSET_FIELD_OFFSET: usize = 8;
pub const SESSION_ID_FIELD_OFFSET: usize = 12;
pub const STREAM_ID_FIELD_OFFSET: usize = 16;
pub const TERM_ID_FIELD_OFFSET: usize = 20;
pub const RESERVED_VALUE_OFFSET: usize = 24;
pub const HEADER_LENGTH: usize = 32;

pub const FRAME_ALIGNMENT: usize = 32;

pub const CURRENT_VERSION: u8 = 0;

pub const HDR_TYPE_PAD: u16 = 0x00;
pub const HDR_TYPE_DATA: u16 = 0x01;

pub const BEGIN_FRAG_FLAG: u8 = 0b1000_0000;
pub const END_FRAG_FLAG: u8 = 0b0100_0000;
pub const UNFRAGMENTED: u8 = BEGIN_FRAG_FLAG | END_FRAG_FLAG;

pub const TERM_MIN_LENGTH: usize = 64 * 1024;
pub const TERM_MAX_LENGTH: usize = 1024 * 1024 * 1024;

pub const DEFAULT_MTU_LENGTH: usize = 1408;
pub const MAX_MESSAGE_LENGTH_ABS: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DataHeader {
    pub frame_length: i32,
    pub version: u8,
    pub flags: u8,
    pub frame_type: u16,
    pub term_offset: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub term_id: i32,
    pub reserved_value: i64,
}

impl DataHeader {
    pub fn template(session_id: i32, stream_id: i32, term_id: i32) -> Self {
        Self {
            frame_length: 0,
            version: CURRENT_VERSION,
            flags: UNFRAGMENTED,
            frame_type: HDR_TYPE_DATA,
            term_offset: 0,
            session_id,
            stream_id,
            term_id,
            reserved_value: 0,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LENGTH] {
        let mut buf = [0u8; HEADER_LENGTH];
        write_i32(&mut buf, FRAME_LENGTH_FIELD_OFFSET, self.frame_length);
        buf[VERSION_FIELD_OFFSET] = self.version;
        buf[FLAGS_FIELD_OFFSET] = self.flags;
        buf[TYPE_FIELD_OFFSET..TYPE_FIELD_OFFSET + 2].copy_from_slice(&self.frame_type.to_le_bytes());
        write_i32(&mut buf, TERM_OFFSET_FIELD_OFFSET, self.term_offset);
        write_i32(&mut buf, SESSION_ID_FIELD_OFFSET, self.session_id);
        write_i32(&mut buf, STREAM_ID_FIELD_OFFSET, self.stream_id);
        write_i32(&mut buf, TERM_ID_FIELD_OFFSET, self.term_id);
        buf[RESERVED_VALUE_OFFSET..RESERVED_VALUE_OFFSET + 8]
            .copy_from_slice(&self.reserved_value.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_LENGTH {
            return Err(Error::new(ErrorKind::Corrupt).with_message("frame header too small"));
        }
        let mut type_bytes = [0u8; 2];
        type_bytes.copy_from_slice(&buf[TYPE_FIELD_OFFSET..TYPE_FIELD_OFFSET + 2]);
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[RESERVED_VALUE_OFFSET..RESERVED_VALUE_OFFSET + 8]);

        Ok(Self {
            frame_length: read_i32(buf, FRAME_LENGTH_FIELD_OFFSET),
            version: buf[VERSION_FIELD_OFFSET],
            flags: buf[FLAGS_FIELD_OFFSET],
            frame_type: u16::from_le_bytes(type_bytes),
            term_offset: read_i32(buf, TERM_OFFSET_FIELD_OFFSET),
            session_id: read_i32(buf, SESSION_ID_FIELD_OFFSET),
            stream_id: read_i32(buf, STREAM_ID_FIELD_OFFSET),
            term_id: read_i32(buf, TERM_ID_FIELD_OFFSET),
            reserved_value: i64::from_le_bytes(reserved),
        })
    }

    pub fn is_padding(&self) -> bool {
        self.frame_type == HDR_TYPE_PAD
    }
}

pub fn align(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + (alignment - 1)) & !(alignment - 1)
}

pub fn aligned_frame_length(payload_len: usize) -> Option<usize> {
    let frame_length = payload_len.checked_add(HEADER_LENGTH)?;
    frame_length
        .checked_add(FRAME_ALIGNMENT - 1)
        .map(|value| value & !(FRAME_ALIGNMENT - 1))
}

pub fn type_offset(frame_offset: usize) -> usize {
    frame_offset + TYPE_FIELD_OFFSET
}

pub fn flags_offset(frame_offset: usize) -> usize {
    frame_offset + FLAGS_FIELD_OFFSET
}

pub fn reserved_value_offset(frame_offset: usize) -> usize {
    frame_offset + RESERVED_VALUE_OFFSET
}

pub fn check_term_length(term_length: usize) -> Result<(), Error> {
    if term_length < TERM_MIN_LENGTH {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "term length {term_length} below minimum {TERM_MIN_LENGTH}"
        )));
    }
    if term_length > TERM_MAX_LENGTH {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "term length {term_length} above maximum {TERM_MAX_LENGTH}"
        )));
    }
    if !term_length.is_power_of_two() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("term length {term_length} is not a power of two")));
    }
    Ok(())
}

pub fn compute_max_message_length(term_length: usize) -> usize {
    (term_length / 8).min(MAX_MESSAGE_LENGTH_ABS)
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    i32::from_le_bytes(out)
}

fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::{
        align, aligned_frame_length, check_term_length, compute_max_message_length, DataHeader,
        FRAME_ALIGNMENT, HDR_TYPE_DATA, HEADER_LENGTH, TERM_MIN_LENGTH, UNFRAGMENTED,
    };
    use crate::core::error::ErrorKind;

    #[test]
    fn alignment_is_32_bytes() {
        assert_eq!(align(0, FRAME_ALIGNMENT), 0);
        assert_eq!(align(1, FRAME_ALIGNMENT), 32);
        assert_eq!(align(32, FRAME_ALIGNMENT), 32);
        assert_eq!(align(33, FRAME_ALIGNMENT), 64);
    }

    #[test]
    fn aligned_frame_length_includes_header() {
        assert_eq!(aligned_frame_length(0), Some(HEADER_LENGTH));
        assert_eq!(aligned_frame_length(20), Some(64));
        assert_eq!(aligned_frame_length(usize::MAX - 8), None);
    }

    #[test]
    fn header_wire_layout_is_little_endian() {
        let mut header = DataHeader::template(0x0102_0304, 5, 7);
        header.frame_length = 52;
        header.term_offset = 64;
        header.reserved_value = 7777;
        let buf = header.encode();
        assert_eq!(&buf[0..4], &52i32.to_le_bytes());
        assert_eq!(buf[4], 0);
        assert_eq!(buf[5], UNFRAGMENTED);
        assert_eq!(&buf[6..8], &HDR_TYPE_DATA.to_le_bytes());
        assert_eq!(&buf[8..12], &64i32.to_le_bytes());
        assert_eq!(&buf[12..16], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[24..32], &7777i64.to_le_bytes());

        let decoded = DataHeader::decode(&buf).expect("decode");
        assert_eq!(decoded, header);
        assert!(!decoded.is_padding());
    }

    #[test]
    fn short_header_is_corrupt() {
        let err = DataHeader::decode(&[0u8; 8]).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn term_length_must_be_power_of_two_in_range() {
        check_term_length(TERM_MIN_LENGTH).expect("min is valid");
        assert_eq!(
            check_term_length(TERM_MIN_LENGTH / 2).expect_err("too small").kind(),
            ErrorKind::Usage
        );
        assert_eq!(
            check_term_length(TERM_MIN_LENGTH + FRAME_ALIGNMENT)
                .expect_err("not a power of two")
                .kind(),
            ErrorKind::Usage
        );
    }

    #[test]
    fn max_message_length_is_an_eighth_of_the_term() {
        assert_eq!(compute_max_message_length(TERM_MIN_LENGTH), 8 * 1024);
        assert_eq!(compute_max_message_length(1024 * 1024 * 1024), 16 * 1024 * 1024);
    }
}
