//! Service and socket lifecycle: the process-control seam, readiness
//! probing, and per-version FPM escalation.

mod controller;
pub mod fpm;
pub mod readiness;
mod system;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{PROXY_UNIT, ProcessController};
pub use fpm::{FpmControl, apply_version};
pub use readiness::{ReadinessPolicy, check_socket, unready_sockets, wait_for_sockets};
pub use system::SystemController;
