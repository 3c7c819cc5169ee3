//! gridplate-core - template format, data loading and output backends.

pub mod backend;
pub mod error;
pub mod report;
pub mod storage;

pub use backend::{Backend, create_backend};
pub use error::{GridplateError, Result};
pub use report::{Rendered, Report, ReportOptions, Template, load_data};

pub use gridplate_engine::engine::CellRef;
