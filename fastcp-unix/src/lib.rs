//! Small libc wrappers the agent needs for account lookup and host facts.

#[cfg(unix)]
pub mod account;
#[cfg(unix)]
pub mod host;
