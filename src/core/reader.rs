// Scans committed frames in a term, polling the ordered length field.
use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{self, DataHeader, FRAME_ALIGNMENT, HEADER_LENGTH};

#[derive(Debug)]
pub struct FrameRef<'a> {
    term_buffer: &'a AtomicBuffer,
    term_offset: usize,
    header: DataHeader,
}

impl<'a> FrameRef<'a> {
    pub fn header(&self) -> &DataHeader {
        &self.header
    }

    pub fn term_offset(&self) -> usize {
        self.term_offset
    }

    pub fn payload_offset(&self) -> usize {
        self.term_offset + HEADER_LENGTH
    }

    pub fn payload_length(&self) -> usize {
        self.header.frame_length as usize - HEADER_LENGTH
    }

    pub fn term_buffer(&self) -> &'a AtomicBuffer {
        self.term_buffer
    }

    pub fn payload(&self) -> Vec<u8> {
        self.term_buffer
            .to_vec(self.payload_offset(), self.payload_length())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadOutcome {
    pub fragments_read: usize,
    pub offset: usize,
}

pub fn read_header(term_buffer: &AtomicBuffer, frame_offset: usize) -> Result<DataHeader, Error> {
    let mut raw = [0u8; HEADER_LENGTH];
    term_buffer.get_bytes(frame_offset, &mut raw);
    DataHeader::decode(&raw)
}

// Delivers up to `fragments_limit` committed data frames starting at `offset`.
// Padding frames are skipped without counting. Stops at the first frame whose
// length is not yet committed.
pub fn read<F>(
    term_buffer: &AtomicBuffer,
    mut offset: usize,
    fragments_limit: usize,
    mut handler: F,
) -> Result<ReadOutcome, Error>
where
    F: FnMut(&FrameRef<'_>),
{
    let capacity = term_buffer.capacity();
    let mut fragments_read = 0;
    while fragments_read < fragments_limit && offset < capacity {
        let frame_length = term_buffer.get_i32_volatile(offset);
        if frame_length <= 0 {
            break;
        }
        let frame_length = frame_length as usize;
        let aligned_length = frame::align(frame_length, FRAME_ALIGNMENT);
        if frame_length < HEADER_LENGTH || offset + aligned_length > capacity {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!("invalid frame length {frame_length}"))
                .with_offset(offset as u64));
        }

        let header = read_header(term_buffer, offset)?;
        if !header.is_padding() {
            handler(&FrameRef {
                term_buffer,
                term_offset: offset,
                header,
            });
            fragments_read += 1;
        }
        offset += aligned_length;
    }
    Ok(ReadOutcome {
        fragments_read,
        offset,
    })
}
