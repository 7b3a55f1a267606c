//! Unrecoverable bridge failures
//!
//! Usage errors and registry consistency violations cannot be reported to
//! the native caller. They are logged and then raised as a panic carrying the
//! same message.

/// Log `message` at error level and panic with it.
#[track_caller]
#[cold]
pub fn fatal(message: impl Into<String>) -> ! {
    let message = message.into();
    let location = std::panic::Location::caller();
    tracing::error!(%location, "{}", message);
    panic!("{}", message)
}
