//! Test utilities for the FastCP agent workspace
//!
//! Fakes for the agent's two seams (the process controller and the site
//! store), a throwaway host layout wired to a real engine and dispatcher,
//! and polling helpers for socket and file state.

pub mod helpers;

pub use helpers::fake_controller::{FailMode, FakeController, is_live};
pub use helpers::host_harness::{HostHarness, quick_policy};
pub use helpers::memory_store::MemoryStore;
pub use helpers::wait_utils::{WaitError, wait_for_file, wait_for_socket};
