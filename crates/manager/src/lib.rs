//! HTTP control surface and settings of the docker-manager daemon

pub mod api;
pub mod config;
