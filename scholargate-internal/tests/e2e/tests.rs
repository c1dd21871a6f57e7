mod common;
mod entitlements;

#[cfg(feature = "e2e_tests")]
mod redis_store;
