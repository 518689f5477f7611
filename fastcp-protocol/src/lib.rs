//! Newline-delimited JSON RPC between the FastCP control panel and the
//! privileged agent.
//!
//! Every message is a single JSON object terminated by `\n`. Requests carry
//! an opaque `id` which the response echoes back; within one connection
//! responses are produced strictly in request order.

pub mod client;
pub mod errors;
pub mod payload;
pub mod protocol;
pub mod server;
