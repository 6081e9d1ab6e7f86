//! Process-wide logging setup.

pub mod logging;

pub use logging::LogFormat;

/// Initialize logging from `RUST_LOG` and `LOG_FORMAT`.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    logging::init(LogFormat::from_env());
}
