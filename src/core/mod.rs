pub mod error;
pub mod value;

pub use error::{Result, StageError};
pub use value::{DataType, Value};
