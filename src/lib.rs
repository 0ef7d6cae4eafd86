//! A session-backed admin backend.
//!
//! The [`session`] module is the reusable part: a cookie-bound, store-agnostic
//! HTTP session layer for axum. The rest wires it into a small user/auth API.

pub mod config;
pub mod db;
pub mod error;
pub mod session;
pub mod state;

pub mod models {
    pub mod session;
    pub mod user;
}

pub mod repositories {
    pub mod user;
}

pub mod services {
    pub mod auth;
}

pub mod handlers {
    pub mod auth;
}

pub mod middleware_layer {
    pub mod auth;
}

pub mod validation {
    pub mod auth;
}
