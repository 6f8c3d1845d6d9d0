//! NUSProfs backend endpoints.

pub mod auth;
pub mod client;
pub mod errors;
pub mod pagination;
pub mod professors;
pub mod reviews;
pub mod transport;
