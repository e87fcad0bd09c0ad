pub mod host;

pub use host::McpToolHost;
