//! Security utilities and middleware

pub mod headers;
pub mod timing;

pub use headers::{with_security_headers, BOARD_CSP};
pub use timing::constant_time_eq;
