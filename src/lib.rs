pub mod common;
pub mod parser;
pub mod query_engine;
pub mod storage_engine;

pub use common::config::DataBaseConfig;
pub use common::error::{Error, JsonQlException, Result};
pub use parser::{CommandOutput, JsonQlCommand, JsonQlParser};
pub use query_engine::Command;
pub use storage_engine::DataBaseStorage;
