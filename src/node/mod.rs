//! Node module - Genesis construction and the shared chain facade

mod genesis;
mod service;

pub use genesis::*;
pub use service::*;
