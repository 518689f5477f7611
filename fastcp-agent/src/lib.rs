//! FastCP host agent.
//!
//! Owns the PHP-FPM pool files and the Caddyfile on a single host, rebuilds
//! them from the site store on demand, and serves the control panel's
//! privileged requests over a Unix socket.

pub mod cmd;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod duration;
pub mod errors;
pub mod files;
pub mod handlers;
pub mod layout;
pub mod lifecycle;
pub mod migrate;
pub mod model;
pub mod outcome;
pub mod php;
pub mod reconcile;
pub mod settings;
pub mod store;
pub mod tenant;
pub mod tuning;
