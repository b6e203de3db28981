//! Business backend gateway over HTTP.

mod http_backend;

pub use http_backend::HttpBackendApi;
