#![warn(clippy::unwrap_used)]

pub mod error;
pub mod identity;
pub mod rest;
pub mod server;

pub use error::{ApiError, ErrorResponse};
pub use identity::Identity;
pub use rest::AppState;
pub use server::{router, ApiServer};
