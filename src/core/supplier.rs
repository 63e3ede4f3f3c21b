//! Purpose: Per-frame hook computing the 8-byte reserved header value.
//! Exports: `ReservedValueSupplier`, `DefaultReservedValue`, `DigestReservedValue`, `FallibleSupplier`.
//! Role: Called by the appender after payload copy and before the length commit.
//! Invariants: Suppliers see a fully written frame whose length field is still negative.
use sha2::{Digest, Sha256};

use crate::core::buffer::AtomicBuffer;
use crate::core::error::Error;
use crate::core::frame::HEADER_LENGTH;

pub trait ReservedValueSupplier {
    fn reserved_value(
        &self,
        term_buffer: &AtomicBuffer,
        frame_offset: i32,
        frame_length: i32,
    ) -> Result<i64, Error>;
}

impl<F> ReservedValueSupplier for F
where
    F: Fn(&AtomicBuffer, i32, i32) -> i64,
{
    fn reserved_value(
        &self,
        term_buffer: &AtomicBuffer,
        frame_offset: i32,
        frame_length: i32,
    ) -> Result<i64, Error> {
        Ok(self(term_buffer, frame_offset, frame_length))
    }
}

pub struct FallibleSupplier<F>(pub F);

impl<F> ReservedValueSupplier for FallibleSupplier<F>
where
    F: Fn(&AtomicBuffer, i32, i32) -> Result<i64, Error>,
{
    fn reserved_value(
        &self,
        term_buffer: &AtomicBuffer,
        frame_offset: i32,
        frame_length: i32,
    ) -> Result<i64, Error> {
        (self.0)(term_buffer, frame_offset, frame_length)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultReservedValue;

impl ReservedValueSupplier for DefaultReservedValue {
    fn reserved_value(&self, _: &AtomicBuffer, _: i32, _: i32) -> Result<i64, Error> {
        Ok(0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DigestReservedValue;

impl DigestReservedValue {
    pub fn digest(payload: &[u8]) -> i64 {
        let hash = Sha256::digest(payload);
        let mut out = [0u8; 8];
        out.copy_from_slice(&hash[..8]);
        i64::from_le_bytes(out)
    }
}

impl ReservedValueSupplier for DigestReservedValue {
    fn reserved_value(
        &self,
        term_buffer: &AtomicBuffer,
        frame_offset: i32,
        frame_length: i32,
    ) -> Result<i64, Error> {
        let payload_len = (frame_length as usize).saturating_sub(HEADER_LENGTH);
        let payload = term_buffer.to_vec(frame_offset as usize + HEADER_LENGTH, payload_len);
        Ok(Self::digest(&payload))
    }
}
