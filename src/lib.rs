//! A line-oriented TCP chat relay.
//!
//! Clients connect, answer a name prompt, and every line they send is
//! broadcast to everyone currently connected. Each module focuses on a
//! concrete responsibility:
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`server`] binds the listener, accepts connections, and spawns the hub
//!   plus one session per connection.
//! - [`hub`] is the single serialization point: it owns the connected-client
//!   set and processes join, leave, and message events one at a time.
//! - [`session`] drives one connection through handshake, the read loop with
//!   its idle timeout, and teardown; it also owns the per-client writer task.
//! - [`wire`] provides the async line reader/writer plus the literal protocol
//!   line formats.
//! - [`client`] is a terminal client that multiplexes stdin and server lines.
//!
//! Integration tests use this crate directly to exercise the hub and the
//! full server over real sockets.

pub mod cli;
pub mod client;
pub mod hub;
pub mod server;
pub mod session;
pub mod wire;
