//! HTTP API handlers

pub mod admin;
pub mod cities;
pub mod health;

pub use admin::admin_routes;
pub use cities::city_routes;
pub use health::health_routes;
