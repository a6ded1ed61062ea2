pub mod db;
pub mod error;
pub mod parser;
pub mod rollup;
pub mod season;
pub mod settings;
pub mod source;

pub use error::IngestError;
