//! Purpose: Lay out term partitions and the metadata region of one log mapping.
//! Exports: `LogBuffers`, tail counter accessors, metadata offsets.
//! Role: Boundary to the collaborator that owns rotation; appenders only see tails and term ids.
//! Invariants: File layout is `[term 0][term 1][term 2][metadata]`, metadata last.
//! Invariants: Tail counters live at `TERM_TAIL_COUNTERS_OFFSET + partition * 8` in metadata.
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use memmap2::MmapMut;

use crate::core::appender::{AppenderOptions, TermAppender};
use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame;
use crate::core::tail;

pub const PARTITION_COUNT: usize = 3;

pub const TERM_TAIL_COUNTERS_OFFSET: usize = 0;
pub const ACTIVE_TERM_ID_OFFSET: usize = TERM_TAIL_COUNTERS_OFFSET + PARTITION_COUNT * 8;
pub const TERM_LENGTH_OFFSET: usize = ACTIVE_TERM_ID_OFFSET + 4;
pub const LOG_MAGIC_OFFSET: usize = TERM_LENGTH_OFFSET + 4;
pub const LOG_VERSION_OFFSET: usize = LOG_MAGIC_OFFSET + 4;
pub const LOG_META_DATA_LENGTH: usize = 4096;

const LOG_MAGIC: [u8; 4] = *b"TLOG";
const LOG_VERSION: u32 = 1;

pub fn tail_counter_offset(partition_index: usize) -> usize {
    TERM_TAIL_COUNTERS_OFFSET + partition_index * 8
}

pub fn raw_tail_volatile(meta_data: &AtomicBuffer, partition_index: usize) -> i64 {
    meta_data.get_i64_volatile(tail_counter_offset(partition_index))
}

pub fn set_raw_tail(meta_data: &AtomicBuffer, partition_index: usize, raw_tail: i64) {
    meta_data.put_i64_ordered(tail_counter_offset(partition_index), raw_tail);
}

pub fn active_term_id(meta_data: &AtomicBuffer) -> i32 {
    meta_data.get_i32_volatile(ACTIVE_TERM_ID_OFFSET)
}

pub fn set_active_term_id(meta_data: &AtomicBuffer, term_id: i32) {
    meta_data.put_i32_ordered(ACTIVE_TERM_ID_OFFSET, term_id);
}

pub fn log_length(term_length: usize) -> usize {
    term_length * PARTITION_COUNT + LOG_META_DATA_LENGTH
}

#[derive(Debug)]
pub struct LogBuffers {
    terms: Vec<AtomicBuffer>,
    meta_data: AtomicBuffer,
    term_length: usize,
    path: Option<PathBuf>,
}

impl LogBuffers {
    pub fn anonymous(term_length: usize, initial_term_id: i32) -> Result<Self, Error> {
        frame::check_term_length(term_length)?;
        let log = AtomicBuffer::anonymous(log_length(term_length))?;
        let buffers = Self::from_log(log, term_length, None)?;
        buffers.initialise(initial_term_id);
        Ok(buffers)
    }

    pub fn create(
        path: impl AsRef<Path>,
        term_length: usize,
        initial_term_id: i32,
    ) -> Result<Self, Error> {
        frame::check_term_length(term_length)?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
        let _lock = FileLock::exclusive(&file, &path)?;
        file.set_len(0)
            .and_then(|_| file.set_len(log_length(term_length) as u64))
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;

        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?
        };
        let buffers = Self::from_log(AtomicBuffer::from_mmap(mmap), term_length, Some(path))?;
        buffers.initialise(initial_term_id);
        buffers.meta_data.flush()?;
        tracing::debug!(path = ?buffers.path, term_length, initial_term_id, "created log");
        Ok(buffers)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
        // Waits out a concurrent `create` still initialising the metadata.
        let _lock = FileLock::shared(&file, &path)?;
        let actual_size = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
        if actual_size < LOG_META_DATA_LENGTH as u64 {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("log file too small")
                .with_path(&path));
        }

        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?
        };
        let log = AtomicBuffer::from_mmap(mmap);
        let meta_data = log
            .view(log.capacity() - LOG_META_DATA_LENGTH, LOG_META_DATA_LENGTH)
            .map_err(|err| Error::new(ErrorKind::Corrupt).with_path(&path).with_source(err))?;

        let mut magic = [0u8; 4];
        meta_data.get_bytes(LOG_MAGIC_OFFSET, &mut magic);
        if magic != LOG_MAGIC {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("bad log magic")
                .with_path(&path));
        }
        let version = meta_data.get_i32(LOG_VERSION_OFFSET) as u32;
        if version != LOG_VERSION {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!("unsupported log version {version}"))
                .with_path(&path));
        }
        let term_length = meta_data.get_i32(TERM_LENGTH_OFFSET) as usize;
        frame::check_term_length(term_length)
            .map_err(|err| Error::new(ErrorKind::Corrupt).with_path(&path).with_source(err))?;
        if log_length(term_length) as u64 != actual_size {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("log length does not match term length")
                .with_path(&path));
        }

        tracing::debug!(path = %path.display(), term_length, "opened log");
        Self::from_log(log, term_length, Some(path))
    }

    fn from_log(log: AtomicBuffer, term_length: usize, path: Option<PathBuf>) -> Result<Self, Error> {
        let terms = (0..PARTITION_COUNT)
            .map(|index| log.view(index * term_length, term_length))
            .collect::<Result<Vec<_>, _>>()?;
        let meta_data = log.view(PARTITION_COUNT * term_length, LOG_META_DATA_LENGTH)?;
        Ok(Self {
            terms,
            meta_data,
            term_length,
            path,
        })
    }

    fn initialise(&self, initial_term_id: i32) {
        self.meta_data.put_bytes(LOG_MAGIC_OFFSET, &LOG_MAGIC);
        self.meta_data.put_i32(LOG_VERSION_OFFSET, LOG_VERSION as i32);
        self.meta_data.put_i32(TERM_LENGTH_OFFSET, self.term_length as i32);
        set_raw_tail(&self.meta_data, 0, tail::pack(initial_term_id, 0));
        set_active_term_id(&self.meta_data, initial_term_id);
    }

    pub fn term_length(&self) -> usize {
        self.term_length
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn term_buffer(&self, partition_index: usize) -> &AtomicBuffer {
        &self.terms[partition_index]
    }

    pub fn meta_data(&self) -> &AtomicBuffer {
        &self.meta_data
    }

    pub fn raw_tail(&self, partition_index: usize) -> i64 {
        raw_tail_volatile(&self.meta_data, partition_index)
    }

    pub fn active_term_id(&self) -> i32 {
        active_term_id(&self.meta_data)
    }

    pub fn initialise_tail(&self, partition_index: usize, term_id: i32) -> Result<(), Error> {
        check_partition(partition_index)?;
        set_raw_tail(&self.meta_data, partition_index, tail::pack(term_id, 0));
        Ok(())
    }

    pub fn appender(&self, partition_index: usize) -> Result<TermAppender, Error> {
        self.appender_with_options(
            partition_index,
            AppenderOptions::for_term_length(self.term_length),
        )
    }

    pub fn appender_with_options(
        &self,
        partition_index: usize,
        options: AppenderOptions,
    ) -> Result<TermAppender, Error> {
        check_partition(partition_index)?;
        TermAppender::with_options(
            self.terms[partition_index].clone(),
            self.meta_data.clone(),
            partition_index,
            options,
        )
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.meta_data.flush()
    }
}

// Held only while a log file is initialised or validated; mapped appends never lock.
struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    fn exclusive(file: &'a File, path: &Path) -> Result<Self, Error> {
        file.lock_exclusive()
            .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
        Ok(Self { file })
    }

    fn shared(file: &'a File, path: &Path) -> Result<Self, Error> {
        file.lock_shared()
            .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
        Ok(Self { file })
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub(crate) fn check_partition(partition_index: usize) -> Result<(), Error> {
    if partition_index >= PARTITION_COUNT {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "partition index {partition_index} out of range (count {PARTITION_COUNT})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{tail_counter_offset, LogBuffers, LOG_META_DATA_LENGTH, PARTITION_COUNT};
    use crate::core::error::ErrorKind;
    use crate::core::frame::TERM_MIN_LENGTH;
    use crate::core::tail::pack;
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    #[test]
    fn tail_counters_are_eight_bytes_apart() {
        assert_eq!(tail_counter_offset(0), 0);
        assert_eq!(tail_counter_offset(2), 16);
    }

    #[test]
    fn anonymous_log_seeds_first_partition() {
        let log = LogBuffers::anonymous(TERM_MIN_LENGTH, 7).expect("log");
        assert_eq!(log.term_length(), TERM_MIN_LENGTH);
        assert_eq!(log.raw_tail(0), pack(7, 0));
        assert_eq!(log.raw_tail(1), 0);
        assert_eq!(log.active_term_id(), 7);
        assert_eq!(log.meta_data().capacity(), LOG_META_DATA_LENGTH);
        for index in 0..PARTITION_COUNT {
            assert_eq!(log.term_buffer(index).capacity(), TERM_MIN_LENGTH);
        }
    }

    #[test]
    fn partitions_do_not_overlap() {
        let log = LogBuffers::anonymous(TERM_MIN_LENGTH, 0).expect("log");
        log.term_buffer(0).put_i64(TERM_MIN_LENGTH - 8, 1);
        log.term_buffer(1).put_i64(0, 2);
        assert_eq!(log.term_buffer(0).get_i64(TERM_MIN_LENGTH - 8), 1);
        assert_eq!(log.term_buffer(1).get_i64(0), 2);
        assert_eq!(log.raw_tail(0), pack(0, 0));
    }

    #[test]
    fn bad_term_length_is_rejected() {
        let err = LogBuffers::anonymous(1000, 0).expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn partition_index_is_checked() {
        let log = LogBuffers::anonymous(TERM_MIN_LENGTH, 0).expect("log");
        assert_eq!(log.initialise_tail(3, 1).expect_err("range").kind(), ErrorKind::Usage);
        log.initialise_tail(1, 8).expect("seed");
        assert_eq!(log.raw_tail(1), pack(8, 0));
    }

    #[test]
    fn create_and_open_file_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stream.log");
        let created = LogBuffers::create(&path, TERM_MIN_LENGTH, 3).expect("create");
        created.term_buffer(0).put_i64(64, 1234);
        created.flush().expect("flush");

        let opened = LogBuffers::open(&path).expect("open");
        assert_eq!(opened.term_length(), TERM_MIN_LENGTH);
        assert_eq!(opened.raw_tail(0), pack(3, 0));
        assert_eq!(opened.term_buffer(0).get_i64(64), 1234);
        assert_eq!(opened.path(), Some(path.as_path()));
    }

    #[test]
    fn corrupt_magic_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stream.log");
        drop(LogBuffers::create(&path, TERM_MIN_LENGTH, 0).expect("create"));

        let mut file = OpenOptions::new().write(true).open(&path).expect("open");
        let magic_at = (TERM_MIN_LENGTH * PARTITION_COUNT + super::LOG_MAGIC_OFFSET) as u64;
        file.seek(SeekFrom::Start(magic_at)).expect("seek");
        file.write_all(b"NOPE").expect("write");
        file.flush().expect("flush");

        match LogBuffers::open(&path) {
            Ok(_) => panic!("expected corrupt log error"),
            Err(err) => assert_eq!(err.kind(), ErrorKind::Corrupt),
        }
    }
}
