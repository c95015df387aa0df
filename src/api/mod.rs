pub mod rest;
pub mod ws;

pub use rest::{router, ApiContext};
