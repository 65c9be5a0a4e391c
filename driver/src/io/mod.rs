//! I/O seams for the driver.

pub mod config;
pub mod desktop;
pub mod process;
pub mod screenshot;
pub mod system;
pub mod version;
#[cfg(windows)]
pub mod win32;
