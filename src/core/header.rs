// Stamps a template data header into a term buffer slot.
use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{
    self, DataHeader, FRAME_LENGTH_FIELD_OFFSET, HEADER_LENGTH, SESSION_ID_FIELD_OFFSET,
    STREAM_ID_FIELD_OFFSET, TERM_ID_FIELD_OFFSET, TERM_OFFSET_FIELD_OFFSET, VERSION_FIELD_OFFSET,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderWriter {
    version_flags_type: [u8; 4],
    session_id: i32,
    stream_id: i32,
}

impl HeaderWriter {
    pub fn new(template: &DataHeader) -> Self {
        let encoded = template.encode();
        let mut version_flags_type = [0u8; 4];
        version_flags_type.copy_from_slice(&encoded[VERSION_FIELD_OFFSET..VERSION_FIELD_OFFSET + 4]);
        Self {
            version_flags_type,
            session_id: template.session_id,
            stream_id: template.stream_id,
        }
    }

    pub fn from_bytes(default_header: &[u8]) -> Result<Self, Error> {
        if default_header.len() != HEADER_LENGTH {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "default header must be {HEADER_LENGTH} bytes, got {}",
                default_header.len()
            )));
        }
        Ok(Self::new(&DataHeader::decode(default_header)?))
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn write(&self, term_buffer: &AtomicBuffer, offset: usize, length: usize, term_id: i32) {
        term_buffer.put_i32_ordered(offset + FRAME_LENGTH_FIELD_OFFSET, -(length as i32));
        term_buffer.put_bytes(offset + VERSION_FIELD_OFFSET, &self.version_flags_type);
        term_buffer.put_i32(offset + TERM_OFFSET_FIELD_OFFSET, offset as i32);
        term_buffer.put_i32(offset + SESSION_ID_FIELD_OFFSET, self.session_id);
        term_buffer.put_i32(offset + STREAM_ID_FIELD_OFFSET, self.stream_id);
        term_buffer.put_i32(offset + TERM_ID_FIELD_OFFSET, term_id);
    }

    pub fn default_flags(&self) -> u8 {
        self.version_flags_type[frame::FLAGS_FIELD_OFFSET - VERSION_FIELD_OFFSET]
    }
}
