//! Catnip - a wakeup gatekeeper in front of O-Neko deployments
//!
//! This library provides an HTTP front door that:
//! - Admits requests for hostnames O-Neko knows about into a wakeup flow
//! - Resolves hostnames and ids to project versions through TTL caches
//! - Triggers deployments and probes them until they answer
//! - Serves a wakeup page that redirects once the deployment is ready
//! - Exposes Prometheus metrics about the O-Neko API and its caches

pub mod admin;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod memoize;
pub mod monitor;
pub mod mux;
pub mod oneko;
pub mod pages;
pub mod periodic;
pub mod server;
pub mod telemetry;
