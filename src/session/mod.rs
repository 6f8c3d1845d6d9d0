//! Token storage, validation, and request authentication.

pub mod headers;
pub mod store;
pub mod validator;
