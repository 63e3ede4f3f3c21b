//! Purpose: Lock-free term append engine for shared-memory message logs.
//! Exports: `core` (frame layout, tail codec, appender, claims, readers, log mapping, errors).
//! Role: Producer-side storage engine; rotation, transport, and flow control live elsewhere.
//! Invariants: Every public append path is non-blocking: one fetch-and-add plus bounded writes.
//! Invariants: A frame becomes visible only through its release-ordered length field.
pub mod core;
