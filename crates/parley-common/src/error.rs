use thiserror::Error;

/// Workspace-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("mcp error: {0}")]
    Mcp(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category() {
        let err = Error::Tool("get_rate exploded".to_string());
        assert_eq!(err.to_string(), "tool error: get_rate exploded");
        let err = Error::Mcp("handshake timed out".to_string());
        assert_eq!(err.to_string(), "mcp error: handshake timed out");
    }
}
