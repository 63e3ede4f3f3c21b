//! Purpose: Shared, cloneable view over mapped memory with plain and ordered accessors.
//! Exports: `AtomicBuffer`.
//! Role: Storage primitive under term buffers and the log metadata region.
//! Invariants: Plain multi-byte accessors are little-endian; 64-bit counters use native order.
//! Invariants: Every access is bounds checked; atomic accesses must be naturally aligned.
use std::fmt;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use memmap2::MmapMut;

use crate::core::error::{Error, ErrorKind};

// Concurrent writers must touch disjoint byte ranges; publication between
// threads goes through the ordered/volatile accessors only.
#[derive(Clone)]
pub struct AtomicBuffer {
    mmap: Arc<MmapMut>,
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapping is kept alive by the Arc and all cross-thread
// publication goes through atomics.
unsafe impl Send for AtomicBuffer {}
unsafe impl Sync for AtomicBuffer {}

impl AtomicBuffer {
    pub fn from_mmap(mut mmap: MmapMut) -> Self {
        let ptr = mmap.as_mut_ptr();
        let len = mmap.len();
        Self {
            mmap: Arc::new(mmap),
            ptr,
            len,
        }
    }

    pub fn anonymous(len: usize) -> Result<Self, Error> {
        if len == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("buffer length is zero"));
        }
        let mmap = MmapMut::map_anon(len).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("anonymous map failed")
                .with_source(err)
        })?;
        Ok(Self::from_mmap(mmap))
    }

    pub fn view(&self, offset: usize, len: usize) -> Result<Self, Error> {
        let end = offset.checked_add(len);
        if len == 0 || end.is_none_or(|end| end > self.len) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("view [{offset}, +{len}) outside buffer of {}", self.len)));
        }
        if offset % 8 != 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("view offset must be 8-byte aligned")
                .with_offset(offset as u64));
        }
        Ok(Self {
            mmap: Arc::clone(&self.mmap),
            // SAFETY: offset + len is within the current view.
            ptr: unsafe { self.ptr.add(offset) },
            len,
        })
    }

    pub fn capacity(&self) -> usize {
        self.len
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.mmap.flush().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("flush failed")
                .with_source(err)
        })
    }

    pub fn get_u8(&self, index: usize) -> u8 {
        self.check(index, 1);
        // SAFETY: bounds checked above.
        unsafe { ptr::read(self.ptr.add(index)) }
    }

    pub fn put_u8(&self, index: usize, value: u8) {
        self.check(index, 1);
        // SAFETY: bounds checked above.
        unsafe { ptr::write(self.ptr.add(index), value) }
    }

    pub fn get_u16(&self, index: usize) -> u16 {
        u16::from_le_bytes(self.read_array(index))
    }

    pub fn put_u16(&self, index: usize, value: u16) {
        self.put_bytes(index, &value.to_le_bytes());
    }

    pub fn get_i32(&self, index: usize) -> i32 {
        i32::from_le_bytes(self.read_array(index))
    }

    pub fn put_i32(&self, index: usize, value: i32) {
        self.put_bytes(index, &value.to_le_bytes());
    }

    pub fn get_i64(&self, index: usize) -> i64 {
        i64::from_le_bytes(self.read_array(index))
    }

    pub fn put_i64(&self, index: usize, value: i64) {
        self.put_bytes(index, &value.to_le_bytes());
    }

    pub fn put_bytes(&self, index: usize, src: &[u8]) {
        self.check(index, src.len());
        // SAFETY: bounds checked above; `src` cannot alias mapped memory we hand out mutably.
        unsafe { ptr::copy(src.as_ptr(), self.ptr.add(index), src.len()) }
    }

    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) {
        self.check(index, dst.len());
        // SAFETY: bounds checked above.
        unsafe { ptr::copy(self.ptr.add(index), dst.as_mut_ptr(), dst.len()) }
    }

    pub fn to_vec(&self, index: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.get_bytes(index, &mut out);
        out
    }

    pub fn get_i32_volatile(&self, index: usize) -> i32 {
        i32::from_le(self.atomic_i32(index).load(Ordering::Acquire))
    }

    pub fn put_i32_ordered(&self, index: usize, value: i32) {
        self.atomic_i32(index).store(value.to_le(), Ordering::Release);
    }

    pub fn get_i64_volatile(&self, index: usize) -> i64 {
        self.atomic_i64(index).load(Ordering::Acquire)
    }

    pub fn put_i64_ordered(&self, index: usize, value: i64) {
        self.atomic_i64(index).store(value, Ordering::Release);
    }

    pub fn get_and_add_i64(&self, index: usize, delta: i64) -> i64 {
        self.atomic_i64(index).fetch_add(delta, Ordering::AcqRel)
    }

    pub fn compare_and_set_i64(&self, index: usize, expected: i64, update: i64) -> bool {
        self.atomic_i64(index)
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn atomic_i32(&self, index: usize) -> &AtomicI32 {
        self.check(index, 4);
        let addr = self.ptr.wrapping_add(index);
        assert!(addr as usize % 4 == 0, "unaligned i32 atomic at index {index}");
        // SAFETY: in bounds, aligned, and the mapping outlives `&self`.
        unsafe { AtomicI32::from_ptr(addr.cast()) }
    }

    fn atomic_i64(&self, index: usize) -> &AtomicI64 {
        self.check(index, 8);
        let addr = self.ptr.wrapping_add(index);
        assert!(addr as usize % 8 == 0, "unaligned i64 atomic at index {index}");
        // SAFETY: in bounds, aligned, and the mapping outlives `&self`.
        unsafe { AtomicI64::from_ptr(addr.cast()) }
    }

    fn read_array<const N: usize>(&self, index: usize) -> [u8; N] {
        let mut out = [0u8; N];
        self.get_bytes(index, &mut out);
        out
    }

    fn check(&self, index: usize, len: usize) {
        let in_bounds = index.checked_add(len).is_some_and(|end| end <= self.len);
        assert!(
            in_bounds,
            "access [{index}, +{len}) outside buffer of {}",
            self.len
        );
    }
}

impl fmt::Debug for AtomicBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicBuffer")
            .field("addr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
