//! Error taxonomy for tile batching and drawing.

/// Result alias used throughout the crate.
pub type TileResult<T> = Result<T, TileError>;

#[derive(thiserror::Error, Debug)]
pub enum TileError {
    /// A texture or buffer request exceeded a fixed backend limit.
    /// Nothing was modified; the caller must shrink the working set or split it
    /// across more layers.
    #[error("capacity exceeded: requested {requested}, capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    /// The backend context was lost or reset. Every cached GPU handle is gone.
    #[error("rendering context lost")]
    ContextLost,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("device error: {0}")]
    Device(#[from] anyhow::Error),
}

impl TileError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether this error invalidates cached GPU state.
    #[must_use]
    pub const fn is_context_loss(&self) -> bool {
        matches!(self, Self::ContextLost)
    }
}
