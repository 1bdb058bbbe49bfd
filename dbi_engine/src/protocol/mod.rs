pub mod param_value;
pub mod types;

pub use param_value::{deserialize_params, serialize_params, ParamValue};
pub use types::{FieldType, ValueKind};
