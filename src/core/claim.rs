// Caller-held window over a reserved, uncommitted frame for zero-copy writes.
use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{self, FRAME_LENGTH_FIELD_OFFSET, HDR_TYPE_PAD, HEADER_LENGTH};

#[derive(Debug)]
struct ClaimedFrame {
    buffer: AtomicBuffer,
    frame_offset: usize,
    frame_length: usize,
}

// Filled by `TermAppender::claim`. Exactly one of `commit` or `abort` must
// follow, otherwise readers stall at this frame.
#[derive(Debug, Default)]
pub struct BufferClaim {
    frame: Option<ClaimedFrame>,
}

impl BufferClaim {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn wrap(&mut self, buffer: AtomicBuffer, frame_offset: usize, frame_length: usize) {
        self.frame = Some(ClaimedFrame {
            buffer,
            frame_offset,
            frame_length,
        });
    }

    pub fn is_active(&self) -> bool {
        self.frame.is_some()
    }

    pub fn buffer(&self) -> Option<&AtomicBuffer> {
        self.frame.as_ref().map(|frame| &frame.buffer)
    }

    pub fn offset(&self) -> usize {
        self.frame
            .as_ref()
            .map_or(0, |frame| frame.frame_offset + HEADER_LENGTH)
    }

    pub fn length(&self) -> usize {
        self.frame
            .as_ref()
            .map_or(0, |frame| frame.frame_length - HEADER_LENGTH)
    }

    pub fn put_bytes(&self, index: usize, src: &[u8]) -> Result<(), Error> {
        let frame = self.active()?;
        let payload_len = frame.frame_length - HEADER_LENGTH;
        if index.checked_add(src.len()).is_none_or(|end| end > payload_len) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "write of {} bytes at {index} exceeds claimed length {payload_len}",
                    src.len()
                ))
                .with_offset(frame.frame_offset as u64));
        }
        frame
            .buffer
            .put_bytes(frame.frame_offset + HEADER_LENGTH + index, src);
        Ok(())
    }

    pub fn flags(&self) -> Result<u8, Error> {
        let frame = self.active()?;
        Ok(frame.buffer.get_u8(frame::flags_offset(frame.frame_offset)))
    }

    pub fn set_flags(&self, flags: u8) -> Result<(), Error> {
        let frame = self.active()?;
        frame.buffer.put_u8(frame::flags_offset(frame.frame_offset), flags);
        Ok(())
    }

    pub fn header_type(&self) -> Result<u16, Error> {
        let frame = self.active()?;
        Ok(frame.buffer.get_u16(frame::type_offset(frame.frame_offset)))
    }

    pub fn set_header_type(&self, frame_type: u16) -> Result<(), Error> {
        let frame = self.active()?;
        frame.buffer.put_u16(frame::type_offset(frame.frame_offset), frame_type);
        Ok(())
    }

    pub fn reserved_value(&self) -> Result<i64, Error> {
        let frame = self.active()?;
        Ok(frame.buffer.get_i64(frame::reserved_value_offset(frame.frame_offset)))
    }

    pub fn put_reserved_value(&self, value: i64) -> Result<(), Error> {
        let frame = self.active()?;
        frame
            .buffer
            .put_i64(frame::reserved_value_offset(frame.frame_offset), value);
        Ok(())
    }

    pub fn commit(&mut self) {
        if let Some(frame) = self.frame.take() {
            frame.buffer.put_i32_ordered(
                frame.frame_offset + FRAME_LENGTH_FIELD_OFFSET,
                frame.frame_length as i32,
            );
        }
    }

    pub fn abort(&mut self) {
        if let Some(frame) = self.frame.take() {
            frame.buffer.put_u16(frame::type_offset(frame.frame_offset), HDR_TYPE_PAD);
            frame.buffer.put_i32_ordered(
                frame.frame_offset + FRAME_LENGTH_FIELD_OFFSET,
                frame.frame_length as i32,
            );
        }
    }

    fn active(&self) -> Result<&ClaimedFrame, Error> {
        self.frame
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::Usage).with_message("buffer claim is not active"))
    }
}
