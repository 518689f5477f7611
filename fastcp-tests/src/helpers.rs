pub mod fake_controller;
pub mod host_harness;
pub mod memory_store;
pub mod wait_utils;
