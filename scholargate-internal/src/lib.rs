pub mod catalog; // feature policies and tier-dependent quotas
pub mod config_parser; // scholargate config file
pub mod endpoints; // API endpoints
pub mod entitlement; // entitlement evaluation and usage metering
pub mod error; // error handling
pub mod gateway_util; // utilities for gateway
pub mod observability; // logs and metrics
pub mod redis_client; // redis client
pub mod subscription; // subscription tier oracle
pub mod window; // usage window calculations
