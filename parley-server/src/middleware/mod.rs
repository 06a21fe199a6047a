//! Request middleware

mod auth;

pub use auth::{API_KEY_HEADER, API_KEY_QUERY_PARAM, require_api_key};
