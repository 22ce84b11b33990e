pub mod auth;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod openapi;
pub mod routes;
pub mod services;
pub mod state;

#[cfg(test)]
pub mod test_support;
