pub mod error;
pub mod queue;
pub mod record;
pub mod service;
pub mod store;
