//! Purpose: Client library for the IGinX polystore binary wire protocol.
//! Exports: `core` (codec, bitmap, normalizer, decoder, cursor, errors) and `api` (sessions, transports).
//! Role: Backs the `iginx` CLI; `api` is the intended entry point for applications.
//! Invariants: `core` is pure and performs no I/O; all network and file access lives in `api`.
//! Invariants: Every failure is an `Error` carrying an `ErrorKind`.
pub mod api;
pub mod core;
