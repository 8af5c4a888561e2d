pub mod models;
pub mod phase;
