pub mod catalog;
pub mod host;

pub use catalog::{
    FunctionDefinition, FunctionSchema, ToolDescriptor, parse_arguments, to_function_schema,
    to_function_schemas,
};
pub use host::ToolHost;
