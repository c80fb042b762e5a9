//! Builtin invocation
//!
//! Everything between a trampoline asking for a builtin and that builtin
//! finishing:
//! - Command tail parsing and normalization
//! - The builtin registry
//! - Invocation frames, delegation to programs and deferred completion
//! - The trampoline entry point

pub mod builtins;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod executor;
pub mod frame;
pub mod parser;


pub use builtins::{Builtin, BuiltinName, BuiltinRegistry, BuiltinResult, NAME_CAPACITY};
pub use dispatch::{TrampolineCall, resolve_builtin_name};
pub use env::EnvBlock;
pub use error::{
    ABORT_EXIT_CODE, AbortReason, BuiltinError, LaunchError, Rejection, SessionAbort,
};
pub use executor::{
    BuiltinContext, BuiltinRuntime, CompleteOutcome, Completion, DEFAULT_COMSPEC, InvokeOutcome,
    InvokeRequest, NoLauncher, PostAction, ProgramLauncher,
};
pub use frame::{Delegation, Frame, FrameState};
pub use parser::{CommandTail, split_args};
