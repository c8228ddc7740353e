pub mod configuration;
pub mod telemetry;

/// Forwards to the `tracing` macro of the given level.
///
/// ```
/// use corelease_common::log;
///
/// log!(info, "Leased {} cores", 4);
/// ```
#[macro_export]
macro_rules! log {
    ($level:ident, $($arg:tt)+) => {
        ::tracing::$level!($($arg)+)
    };
}
