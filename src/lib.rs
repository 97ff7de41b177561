pub mod config;
pub mod core;
pub mod logging;
pub mod utils;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
