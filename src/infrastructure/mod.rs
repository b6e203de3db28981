//! Infrastructure layer: adapters to external systems.

pub mod backend;

pub use backend::HttpBackendApi;
