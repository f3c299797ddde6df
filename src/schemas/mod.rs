//! Request / response types for the HTTP API.

pub mod auth;
pub mod chat;
