use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine runtime has shut down; the handle can no longer be used.
    #[error("engine runtime is no longer running")]
    Closed,
}
