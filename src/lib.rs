//! # echo-api
//!
//! Account and admin-console backend for the echo chat service. The service
//! exposes one multiplexed WebSocket endpoint plus a small HTTP surface.
//!
//! ## WebSocket protocol
//!
//! Every frame is a two-level envelope: `{"target": ..., "data": {"action":
//! ..., "data": {...}}}`. The framing layer validates the envelope and
//! answers the built-in `ping` target; everything else is dispatched to the
//! worker registered for the target (`admin`, `users`). Malformed input is
//! reported back as `{"error": ...}` without closing the connection.
//!
//! ## Admin authentication
//!
//! The `admin` target carries an owner-operator challenge/response flow:
//! the server sends an RSA-encrypted random challenge as a raw binary frame
//! and expects the MD5 digest of the decrypted plaintext back. Failed
//! attempts feed a per-connection waitlist that escalates from a short
//! retry timeout to a hard lockout; successful authentication expires after
//! a configured window.
//!
//! ## Sessions and verification
//!
//! Login issues opaque bearer tokens bound to a user and a type. Email
//! verification codes are single-use, URL-safe, and at most one is live per
//! user; `GET /users/verify/{code}` consumes them.

pub mod api;
pub mod cli;
pub mod db;
pub mod mail;
pub mod models;
