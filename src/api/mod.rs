//! HTTP adapter for geochain

pub mod routes;
pub mod server;

pub use server::{router, ApiServer};
