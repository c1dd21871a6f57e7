pub mod entitlements;
pub mod fallback;
pub mod status;
