pub mod analysis;
pub mod catalog;
pub mod config;
pub mod data_handling;
pub mod error;
pub mod helper_functions;
pub mod models;
pub mod store;

pub use config::PipelineConfig;
pub use error::{PhenosnipError, Result};
pub use store::Database;
