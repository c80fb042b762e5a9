//! dosbuiltin - resident builtin commands for a DOS compatibility layer
//!
//! A trampoline program calls in, names a builtin, and the runtime runs the
//! matching native handler as if it were the program.
//!
//! Design principles:
//! - Bounded: fixed scratch pool, fixed nesting limit
//! - Every scratch byte is accounted for; leaks are reported
//! - Handing work to a real program is an explicit state, finished later
//!   by a separate completion call
//!
//! ```
//! use dosbuiltin::{BuiltinRuntime, InvokeOutcome, InvokeRequest};
//!
//! let mut rt = BuiltinRuntime::new();
//! rt.register_fn("ver", |ctx, _args| {
//!     ctx.set_return_code(5);
//!     Ok(0)
//! });
//!
//! let outcome = rt.invoke(InvokeRequest::new("VER", "")).unwrap();
//! assert!(matches!(outcome, InvokeOutcome::Completed { return_code: 5, .. }));
//! ```

pub mod config;
pub mod kernel;
pub mod shell;

pub use config::{ConfigError, RuntimeConfig};
pub use shell::{
    BuiltinContext, BuiltinError, BuiltinRuntime, CommandTail, CompleteOutcome, EnvBlock,
    InvokeOutcome, InvokeRequest, PostAction, ProgramLauncher, Rejection, SessionAbort,
};

/// Log to stderr
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        eprintln!($($t)*)
    };
}
