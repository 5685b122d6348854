//! HTTP surface: health, matchmaking and stats routes

pub mod routes;

pub use routes::build_router;
