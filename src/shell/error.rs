//! Invocation errors
//!
//! Three tiers, by who has to deal with them:
//! - [`Rejection`]: the request was refused before any frame existed
//! - [`LaunchError`]: a builtin's attempt to delegate to a program failed;
//!   the builtin sees it and decides what to do
//! - [`SessionAbort`]: the scratch pool cannot serve a request; the whole
//!   session is torn down

/// Exit code used when the session is aborted
pub const ABORT_EXIT_CODE: i32 = 86;

/// Why an invocation request was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No builtin registered under the name
    UnknownBuiltin { name: String },
    /// Frame stack already at its limit
    NestingLimit { max: usize },
    /// Trampoline speaks a different calling convention
    VersionMismatch { found: u8, required: u8 },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownBuiltin { name } => write!(f, "unknown builtin: {}", name),
            Self::NestingLimit { max } => write!(f, "cannot invoke more than {} builtins", max),
            Self::VersionMismatch { found, required } => write!(
                f,
                "builtins plugin version mismatch: found {}, required {}",
                found, required
            ),
        }
    }
}

impl std::error::Error for Rejection {}

/// What made the session unrecoverable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// A scratch request could not be served
    ScratchExhausted {
        builtin: String,
        requested: usize,
        available: usize,
    },
    /// Zero-sized scratch request
    InvalidRequest { builtin: String },
    /// The scratch pool itself could not be set up
    PoolUnavailable { capacity: usize },
}

/// Session-fatal failure
///
/// Once raised, every frame is discarded, the pool is dropped and an exit
/// request is queued. Every later call reports the same abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAbort {
    pub code: i32,
    pub reason: AbortReason,
}

impl SessionAbort {
    pub fn new(reason: AbortReason) -> Self {
        Self {
            code: ABORT_EXIT_CODE,
            reason,
        }
    }
}

impl std::fmt::Display for SessionAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            AbortReason::ScratchExhausted {
                builtin,
                requested,
                available,
            } => write!(
                f,
                "builtin {} OOM: requested {} bytes, {} available",
                builtin, requested, available
            ),
            AbortReason::InvalidRequest { builtin } => {
                write!(f, "builtin {} requested zero bytes of scratch memory", builtin)
            }
            AbortReason::PoolUnavailable { capacity } => {
                write!(f, "unable to allocate memory pool of {} bytes", capacity)
            }
        }?;
        write!(f, " (exit {})", self.code)
    }
}

impl std::error::Error for SessionAbort {}

/// Delegation failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// The frame already handed work to a program
    AlreadyDelegated { builtin: String },
    /// The host could not start the program
    Failed { reason: String },
}

impl LaunchError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyDelegated { builtin } => {
                write!(f, "builtin {} already delegated to a program", builtin)
            }
            Self::Failed { reason } => write!(f, "program launch failed: {}", reason),
        }
    }
}

impl std::error::Error for LaunchError {}

/// Error a builtin handler can return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinError {
    Abort(SessionAbort),
    Launch(LaunchError),
}

impl std::fmt::Display for BuiltinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abort(e) => write!(f, "{}", e),
            Self::Launch(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for BuiltinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Abort(e) => Some(e),
            Self::Launch(e) => Some(e),
        }
    }
}

impl From<SessionAbort> for BuiltinError {
    fn from(e: SessionAbort) -> Self {
        Self::Abort(e)
    }
}

impl From<LaunchError> for BuiltinError {
    fn from(e: LaunchError) -> Self {
        Self::Launch(e)
    }
}
