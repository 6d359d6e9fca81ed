//! Error types for the zap subsystem.

/// Errors that can occur when wiring live traces.
#[derive(Debug, thiserror::Error)]
pub enum ZapError {
    /// Taps were already installed for this graph; a second combined stream
    /// would double-deliver every event.
    #[error("zap taps already installed for this graph")]
    AlreadyTapped,
}
