pub mod archive;
pub mod ast;
pub mod dataset;
pub mod decimal;
pub mod error;
pub mod evaluator;
pub mod facade;
pub mod ingest;
pub mod parser;
pub mod snapshot;
pub mod store;
pub mod validator;


pub use dataset::{DatasetKind, InsightDataset};
pub use error::{FacadeError, InsightError, QueryError};
pub use evaluator::ResultRow;
pub use facade::{FacadeConfig, InsightFacade};
pub use parser::{parse_command, Command};
