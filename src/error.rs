use thiserror::Error;

/// Error taxonomy for the bridge service.
///
/// Per-cycle hardware and delivery failures are recoverable and must never
/// escape a watchdog timer body; only configuration errors are allowed to
/// abort service startup.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transient hardware error: {0}")]
    TransientHardware(String),

    #[error("failed to release device resources: {0}")]
    ResourceRelease(String),

    #[error("device connect failed: {0}")]
    ConnectFailed(String),

    #[error("recovery escalated to supervisor after {attempts} attempts")]
    Escalated { attempts: u32 },

    #[error("delivery transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// True for errors that the next watchdog cycle is expected to clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::TransientHardware(_)
                | BridgeError::ConnectFailed(_)
                | BridgeError::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
