//! Idea workflow core: resolves the approval workflow for an idea, routes it
//! through that workflow's stages and records every transition.

pub mod audit;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod models;
pub mod notify;
pub mod store;
