#![warn(clippy::unwrap_used)]

pub mod analytics_rest;
pub mod experiment_rest;
pub mod rest;
pub mod server;
pub mod swagger;
pub mod tracking_rest;

pub use rest::AppState;
pub use server::{router, ApiServer};
pub use swagger::ApiDoc;
