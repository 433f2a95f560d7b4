pub mod health;
pub mod password_reset;
pub mod usage;

pub use health::health_check;
pub use password_reset::{request_password_reset, reset_password};
pub use usage::{consume_usage, get_usage};
