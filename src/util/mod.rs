//! Utility modules

pub mod resource;
