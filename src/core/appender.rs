//! Purpose: Lock-free append of framed messages into one term of a shared log.
//! Exports: `TermAppender`, `AppenderOptions`.
//! Role: Reserves space with a single fetch-and-add on the packed tail, then writes frames.
//! Invariants: Granted ranges never overlap; only the caller that crosses the end pads it.
//! Invariants: A frame's positive length is stored after its header, payload, and reserved value.
//! Invariants: Trip/fail are returned as values; `Err` means the reserved value supplier failed.
use crate::core::buffer::AtomicBuffer;
use crate::core::claim::BufferClaim;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{
    self, BEGIN_FRAG_FLAG, END_FRAG_FLAG, FRAME_ALIGNMENT, HDR_TYPE_PAD, HEADER_LENGTH,
};
use crate::core::header::HeaderWriter;
use crate::core::log;
use crate::core::supplier::ReservedValueSupplier;
use crate::core::tail::{self, AppendResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AppenderOptions {
    pub max_frame_length: usize,
    pub max_message_length: usize,
}

impl AppenderOptions {
    pub fn for_term_length(term_length: usize) -> Self {
        let max_frame_length =
            frame::DEFAULT_MTU_LENGTH.min(term_length / 8) & !(FRAME_ALIGNMENT - 1);
        Self {
            max_frame_length,
            max_message_length: frame::compute_max_message_length(term_length),
        }
    }

    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    pub fn with_max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length;
        self
    }

    pub fn max_payload_length(&self) -> usize {
        self.max_frame_length - HEADER_LENGTH
    }

    pub fn validate(&self, term_length: usize) -> Result<(), Error> {
        if self.max_frame_length < HEADER_LENGTH + FRAME_ALIGNMENT {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "max frame length {} leaves no room for payload",
                self.max_frame_length
            )));
        }
        if self.max_frame_length % FRAME_ALIGNMENT != 0 {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "max frame length {} is not a multiple of {FRAME_ALIGNMENT}",
                self.max_frame_length
            )));
        }
        if self.max_frame_length > term_length {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("max frame length exceeds term length"));
        }
        let message_limit = frame::compute_max_message_length(term_length);
        if self.max_message_length == 0 || self.max_message_length > message_limit {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "max message length {} must be within (0, {message_limit}]",
                self.max_message_length
            )));
        }
        Ok(())
    }
}

enum Reservation {
    Granted {
        term_id: i32,
        term_offset: usize,
        resulting_offset: usize,
    },
    Rejected(AppendResult),
}

#[derive(Clone, Debug)]
pub struct TermAppender {
    term_buffer: AtomicBuffer,
    meta_data: AtomicBuffer,
    tail_counter_offset: usize,
    options: AppenderOptions,
}

impl TermAppender {
    pub fn new(
        term_buffer: AtomicBuffer,
        meta_data: AtomicBuffer,
        partition_index: usize,
    ) -> Result<Self, Error> {
        let options = AppenderOptions::for_term_length(term_buffer.capacity());
        Self::with_options(term_buffer, meta_data, partition_index, options)
    }

    pub fn with_options(
        term_buffer: AtomicBuffer,
        meta_data: AtomicBuffer,
        partition_index: usize,
        options: AppenderOptions,
    ) -> Result<Self, Error> {
        frame::check_term_length(term_buffer.capacity())?;
        log::check_partition(partition_index)?;
        let tail_counter_offset = log::tail_counter_offset(partition_index);
        if tail_counter_offset + 8 > meta_data.capacity() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("metadata buffer too small for tail counter")
                .with_offset(tail_counter_offset as u64));
        }
        options.validate(term_buffer.capacity())?;
        Ok(Self {
            term_buffer,
            meta_data,
            tail_counter_offset,
            options,
        })
    }

    pub fn term_buffer(&self) -> &AtomicBuffer {
        &self.term_buffer
    }

    pub fn options(&self) -> AppenderOptions {
        self.options
    }

    pub fn raw_tail_volatile(&self) -> i64 {
        self.meta_data.get_i64_volatile(self.tail_counter_offset)
    }

    pub fn tail_offset(&self) -> usize {
        let offset = tail::raw_tail_offset(self.raw_tail_volatile());
        offset.min(self.term_buffer.capacity() as i64) as usize
    }

    pub fn claim(&self, header: &HeaderWriter, length: usize, claim: &mut BufferClaim) -> AppendResult {
        let Some(aligned_length) = self.frame_fits(length) else {
            return self.failed();
        };
        match self.reserve(header, aligned_length) {
            Reservation::Granted {
                term_id,
                term_offset,
                resulting_offset,
            } => {
                let frame_length = length + HEADER_LENGTH;
                header.write(&self.term_buffer, term_offset, frame_length, term_id);
                claim.wrap(self.term_buffer.clone(), term_offset, frame_length);
                appended(term_id, resulting_offset)
            }
            Reservation::Rejected(result) => result,
        }
    }

    pub fn append_unfragmented_message<S>(
        &self,
        header: &HeaderWriter,
        src: &[u8],
        supplier: &S,
    ) -> Result<AppendResult, Error>
    where
        S: ReservedValueSupplier + ?Sized,
    {
        let Some(aligned_length) = self.frame_fits(src.len()) else {
            return Ok(self.failed());
        };
        match self.reserve(header, aligned_length) {
            Reservation::Granted {
                term_id,
                term_offset,
                resulting_offset,
            } => {
                let frame_length = src.len() + HEADER_LENGTH;
                header.write(&self.term_buffer, term_offset, frame_length, term_id);
                self.term_buffer.put_bytes(term_offset + HEADER_LENGTH, src);
                self.publish(
                    header,
                    supplier,
                    term_id,
                    term_offset,
                    frame_length,
                    term_offset + aligned_length,
                )?;
                Ok(appended(term_id, resulting_offset))
            }
            Reservation::Rejected(result) => Ok(result),
        }
    }

    pub fn append_fragmented_message<S>(
        &self,
        header: &HeaderWriter,
        src: &[u8],
        max_payload_length: usize,
        supplier: &S,
    ) -> Result<AppendResult, Error>
    where
        S: ReservedValueSupplier + ?Sized,
    {
        let Some(required_length) = self.fragmented_length(src.len(), max_payload_length) else {
            return Ok(self.failed());
        };
        let (term_id, term_offset, resulting_offset) = match self.reserve(header, required_length) {
            Reservation::Granted {
                term_id,
                term_offset,
                resulting_offset,
            } => (term_id, term_offset, resulting_offset),
            Reservation::Rejected(result) => return Ok(result),
        };

        let span_end = term_offset + required_length;
        let mut frame_offset = term_offset;
        let mut remaining = src;
        let mut flags = BEGIN_FRAG_FLAG;
        loop {
            let bytes_to_write = remaining.len().min(max_payload_length);
            let frame_length = bytes_to_write + HEADER_LENGTH;
            header.write(&self.term_buffer, frame_offset, frame_length, term_id);
            self.term_buffer
                .put_bytes(frame_offset + HEADER_LENGTH, &remaining[..bytes_to_write]);
            if remaining.len() <= max_payload_length {
                flags |= END_FRAG_FLAG;
            }
            self.term_buffer.put_u8(frame::flags_offset(frame_offset), flags);
            self.publish(header, supplier, term_id, frame_offset, frame_length, span_end)?;

            remaining = &remaining[bytes_to_write..];
            if remaining.is_empty() {
                break;
            }
            flags = 0;
            frame_offset += frame::align(frame_length, FRAME_ALIGNMENT);
        }

        Ok(appended(term_id, resulting_offset))
    }

    pub fn append_message<S>(
        &self,
        header: &HeaderWriter,
        src: &[u8],
        supplier: &S,
    ) -> Result<AppendResult, Error>
    where
        S: ReservedValueSupplier + ?Sized,
    {
        let max_payload_length = self.options.max_payload_length();
        if src.len() <= max_payload_length {
            self.append_unfragmented_message(header, src, supplier)
        } else {
            self.append_fragmented_message(header, src, max_payload_length, supplier)
        }
    }

    pub fn append_padding(&self, header: &HeaderWriter, length: usize) -> AppendResult {
        if length > self.options.max_message_length {
            return self.failed();
        }
        let Some(aligned_length) = frame::aligned_frame_length(length) else {
            return self.failed();
        };
        match self.reserve(header, aligned_length) {
            Reservation::Granted {
                term_id,
                term_offset,
                resulting_offset,
            } => {
                self.write_padding(header, term_offset, length + HEADER_LENGTH, term_id);
                appended(term_id, resulting_offset)
            }
            Reservation::Rejected(result) => result,
        }
    }

    fn frame_fits(&self, payload_length: usize) -> Option<usize> {
        let frame_length = payload_length.checked_add(HEADER_LENGTH)?;
        if frame_length > self.options.max_frame_length {
            return None;
        }
        frame::aligned_frame_length(payload_length)
    }

    fn fragmented_length(&self, length: usize, max_payload_length: usize) -> Option<usize> {
        let max_frame_length = max_payload_length.checked_add(HEADER_LENGTH)?;
        if max_payload_length == 0
            || max_frame_length > self.options.max_frame_length
            || length > self.options.max_message_length
        {
            return None;
        }
        let full_frames = length / max_payload_length;
        let last_payload = length % max_payload_length;
        let full_length = frame::aligned_frame_length(max_payload_length)?.checked_mul(full_frames)?;
        let last_length = if last_payload > 0 || full_frames == 0 {
            frame::aligned_frame_length(last_payload)?
        } else {
            0
        };
        let required_length = full_length.checked_add(last_length)?;
        // Header overhead can push a small-fragment run past the whole term.
        if required_length > self.term_buffer.capacity() {
            return None;
        }
        Some(required_length)
    }

    fn reserve(&self, header: &HeaderWriter, aligned_length: usize) -> Reservation {
        let term_length = self.term_buffer.capacity() as i64;
        let raw_tail = self
            .meta_data
            .get_and_add_i64(self.tail_counter_offset, aligned_length as i64);
        let term_id = tail::term_id(raw_tail);
        let term_offset = tail::raw_tail_offset(raw_tail);
        let resulting_offset = term_offset + aligned_length as i64;

        if resulting_offset <= term_length {
            return Reservation::Granted {
                term_id,
                term_offset: term_offset as usize,
                resulting_offset: resulting_offset as usize,
            };
        }

        if term_offset < term_length {
            let padding_length = (term_length - term_offset) as usize;
            self.write_padding(header, term_offset as usize, padding_length, term_id);
            self.seal(term_id);
            tracing::debug!(term_id, term_offset, padding_length, "term tripped");
            Reservation::Rejected(AppendResult::Tripped { term_id })
        } else {
            self.seal(term_id);
            Reservation::Rejected(AppendResult::Failed { term_id })
        }
    }

    // Pins the tail offset at the term length so later reservations observe a
    // sealed term and the low word cannot run into the term id.
    fn seal(&self, term_id: i32) {
        let term_length = self.term_buffer.capacity() as i64;
        let sealed = tail::pack(term_id, term_length as i32);
        let mut current = self.raw_tail_volatile();
        while tail::term_id(current) == term_id && tail::raw_tail_offset(current) > term_length {
            if self
                .meta_data
                .compare_and_set_i64(self.tail_counter_offset, current, sealed)
            {
                break;
            }
            current = self.raw_tail_volatile();
        }
    }

    fn publish<S>(
        &self,
        header: &HeaderWriter,
        supplier: &S,
        term_id: i32,
        frame_offset: usize,
        frame_length: usize,
        span_end: usize,
    ) -> Result<(), Error>
    where
        S: ReservedValueSupplier + ?Sized,
    {
        match supplier.reserved_value(&self.term_buffer, frame_offset as i32, frame_length as i32) {
            Ok(value) => {
                self.term_buffer
                    .put_i64(frame::reserved_value_offset(frame_offset), value);
                self.term_buffer.put_i32_ordered(frame_offset, frame_length as i32);
                Ok(())
            }
            Err(err) => {
                // The rest of the reservation becomes one padding frame so readers can pass it.
                self.write_padding(header, frame_offset, span_end - frame_offset, term_id);
                tracing::warn!(term_id, frame_offset, error = %err, "reserved value supplier failed");
                Err(err.with_term_id(term_id).with_offset(frame_offset as u64))
            }
        }
    }

    fn write_padding(&self, header: &HeaderWriter, offset: usize, length: usize, term_id: i32) {
        header.write(&self.term_buffer, offset, length, term_id);
        self.term_buffer.put_u16(frame::type_offset(offset), HDR_TYPE_PAD);
        self.term_buffer.put_i32_ordered(offset, length as i32);
    }

    fn failed(&self) -> AppendResult {
        AppendResult::Failed {
            term_id: tail::term_id(self.raw_tail_volatile()),
        }
    }
}

fn appended(term_id: i32, resulting_offset: usize) -> AppendResult {
    AppendResult::Appended {
        term_id,
        term_offset: resulting_offset as i32,
    }
}
