//! Purpose: Pack a term id and a term offset into one 64-bit tail counter value.
//! Exports: `pack`, `term_id`, `term_offset`, `TRIPPED`, `FAILED`, `AppendResult`.
//! Role: The only place the tripped/failed sentinel offsets are interpreted.
//! Invariants: Term id occupies the high 32 bits, offset the low 32 bits, bit for bit.
//! Invariants: `AppendResult` round-trips through `packed()` without changing bits.

pub const TRIPPED: i32 = -1;
pub const FAILED: i32 = -2;

pub fn pack(term_id: i32, term_offset: i32) -> i64 {
    ((term_id as i64) << 32) | (term_offset as i64 & 0xFFFF_FFFF)
}

pub fn term_id(packed: i64) -> i32 {
    (packed >> 32) as i32
}

pub fn term_offset(packed: i64) -> i32 {
    packed as i32
}

// Raw tails can run past i32::MAX after failed reservations, so the appender
// compares offsets as unsigned.
pub(crate) fn raw_tail_offset(raw_tail: i64) -> i64 {
    raw_tail & 0xFFFF_FFFF
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppendResult {
    Appended { term_id: i32, term_offset: i32 },
    Tripped { term_id: i32 },
    Failed { term_id: i32 },
}

impl AppendResult {
    pub fn from_packed(packed: i64) -> Self {
        let term_id = term_id(packed);
        match term_offset(packed) {
            TRIPPED => AppendResult::Tripped { term_id },
            FAILED => AppendResult::Failed { term_id },
            term_offset => AppendResult::Appended { term_id, term_offset },
        }
    }

    pub fn packed(&self) -> i64 {
        match *self {
            AppendResult::Appended { term_id, term_offset } => pack(term_id, term_offset),
            AppendResult::Tripped { term_id } => pack(term_id, TRIPPED),
            AppendResult::Failed { term_id } => pack(term_id, FAILED),
        }
    }

    pub fn term_id(&self) -> i32 {
        match *self {
            AppendResult::Appended { term_id, .. }
            | AppendResult::Tripped { term_id }
            | AppendResult::Failed { term_id } => term_id,
        }
    }

    pub fn new_tail(&self) -> Option<i32> {
        match *self {
            AppendResult::Appended { term_offset, .. } => Some(term_offset),
            _ => None,
        }
    }

    pub fn is_appended(&self) -> bool {
        matches!(self, AppendResult::Appended { .. })
    }
}
