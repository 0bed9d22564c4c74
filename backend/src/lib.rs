pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod storage;
