//! Shared utilities.

pub mod clock;
pub mod interrupt;
pub mod telemetry;

pub use clock::now_ms;
pub use interrupt::Interrupter;
pub use telemetry::init_tracing;
