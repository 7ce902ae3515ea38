//! Battery model and synthetic site-signal generators.

/// Synthetic site load profile generator.
pub mod baseload;
/// Battery configuration and state model.
pub mod battery;
/// Synthetic day-ahead price curve.
pub mod price;
/// Synthetic PV generation model.
pub mod solar;
pub mod types;

// Re-export the main types for convenience
pub use baseload::BaseLoad;
pub use battery::{AppliedFlow, BatterySnapshot, BatteryState, BessConfig, DegradationParams};
pub use price::PriceCurve;
pub use solar::SolarPv;
pub use types::Device;
pub use types::DeviceContext;
