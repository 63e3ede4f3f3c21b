// Full structural scan of a term up to a tail offset.
// Used by tests and tooling; the append path never calls it.
use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{self, FRAME_ALIGNMENT, HEADER_LENGTH};
use crate::core::reader::read_header;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TermSummary {
    pub data_frames: usize,
    pub padding_frames: usize,
    pub data_bytes: usize,
    pub padding_bytes: usize,
}

impl TermSummary {
    pub fn total_bytes(&self) -> usize {
        self.data_bytes + self.padding_bytes
    }
}

pub fn scan_term(term_buffer: &AtomicBuffer, limit: usize, term_id: i32) -> Result<TermSummary, Error> {
    if limit > term_buffer.capacity() || limit % FRAME_ALIGNMENT != 0 {
        return Err(Error::new(ErrorKind::Usage).with_message(format!("invalid scan limit {limit}")));
    }

    let mut summary = TermSummary::default();
    let mut offset = 0usize;
    while offset < limit {
        let frame_length = term_buffer.get_i32_volatile(offset);
        if frame_length <= 0 {
            return Err(corrupt("uncommitted frame", term_id, offset));
        }
        let frame_length = frame_length as usize;
        if frame_length < HEADER_LENGTH {
            return Err(corrupt("frame shorter than header", term_id, offset));
        }
        let aligned_length = frame::align(frame_length, FRAME_ALIGNMENT);
        if offset + aligned_length > limit {
            return Err(corrupt("frame overruns scan limit", term_id, offset));
        }

        let header = read_header(term_buffer, offset)?;
        if header.term_offset as usize != offset {
            return Err(corrupt("term offset field mismatch", term_id, offset));
        }
        if header.term_id != term_id {
            return Err(corrupt("term id mismatch", term_id, offset));
        }

        if header.is_padding() {
            summary.padding_frames += 1;
            summary.padding_bytes += aligned_length;
        } else {
            summary.data_frames += 1;
            summary.data_bytes += aligned_length;
        }
        offset += aligned_length;
    }
    Ok(summary)
}

fn corrupt(message: &str, term_id: i32, offset: usize) -> Error {
    Error::new(ErrorKind::Corrupt)
        .with_message(message.to_string())
        .with_term_id(term_id)
        .with_offset(offset as u64)
}
