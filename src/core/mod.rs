// Core modules implementing framing, reservation, and error modeling.
pub mod appender;
pub mod buffer;
pub mod claim;
pub mod error;
pub mod frame;
pub mod header;
pub mod log;
pub mod reader;
pub mod supplier;
pub mod tail;
pub mod validate;
