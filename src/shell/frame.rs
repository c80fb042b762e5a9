//! Invocation frames
//!
//! One frame per builtin invocation in flight. Frames form a strict stack:
//! a builtin may start another builtin before it finishes, and the inner one
//! always finishes first.
//!
//! Lifecycle:
//! ```text
//! (resolved) -> Running -> Completed ------------------> (popped)
//!                      \-> AwaitingCompletion -> Completed -> (popped)
//! ```
//! A frame only exists between push and pop, so the name-resolution and
//! popped phases have no state of their own.

use super::builtins::BuiltinName;
use super::env::EnvBlock;
use super::executor::ProgramLauncher;
use crate::kernel::memory::ScratchPtr;
use futures::channel::oneshot;
use std::rc::Rc;

/// Frame state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Handler is executing
    Running,
    /// Handler handed its work to a program and returned
    AwaitingCompletion,
    /// Finished; popped as soon as nothing above it is still pending
    Completed,
}

/// Scratch artifacts of a delegation to a program
///
/// They stay allocated until the frame completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delegation {
    pub param_block: ScratchPtr,
    pub program_path: ScratchPtr,
    pub cmd_line: ScratchPtr,
}

/// Per-invocation state
pub struct Frame {
    pub(crate) name: BuiltinName,
    pub(crate) state: FrameState,
    pub(crate) delegation: Option<Delegation>,
    pub(crate) return_code: u16,
    pub(crate) terminate_on_completion: bool,
    pub(crate) launcher: Rc<dyn ProgramLauncher>,
    pub(crate) env: Rc<EnvBlock>,
    pub(crate) psp_segment: u16,
    pub(crate) completion: Option<oneshot::Sender<u16>>,
}

impl Frame {
    pub(crate) fn new(
        name: BuiltinName,
        launcher: Rc<dyn ProgramLauncher>,
        env: Rc<EnvBlock>,
        psp_segment: u16,
    ) -> Self {
        Self {
            name,
            state: FrameState::Running,
            delegation: None,
            return_code: 0,
            terminate_on_completion: false,
            launcher,
            env,
            psp_segment,
            completion: None,
        }
    }

    pub fn name(&self) -> &BuiltinName {
        &self.name
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// True once the handler has delegated to a program
    pub fn owns_delegated_memory(&self) -> bool {
        self.delegation.is_some()
    }

    pub fn delegation(&self) -> Option<&Delegation> {
        self.delegation.as_ref()
    }

    pub fn return_code(&self) -> u16 {
        self.return_code
    }

    pub fn terminate_on_completion(&self) -> bool {
        self.terminate_on_completion
    }

    pub fn env(&self) -> &EnvBlock {
        &self.env
    }

    pub fn psp_segment(&self) -> u16 {
        self.psp_segment
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("delegation", &self.delegation)
            .field("return_code", &self.return_code)
            .field("terminate_on_completion", &self.terminate_on_completion)
            .field("psp_segment", &self.psp_segment)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::executor::NoLauncher;

    #[test]
    fn test_new_frame_defaults() {
        let frame = Frame::new(
            BuiltinName::new("dir"),
            Rc::new(NoLauncher),
            Rc::new(EnvBlock::new()),
            0x0800,
        );

        assert_eq!(frame.name().as_str(), "DIR");
        assert_eq!(frame.state(), FrameState::Running);
        assert_eq!(frame.return_code(), 0);
        assert!(!frame.owns_delegated_memory());
        assert!(!frame.terminate_on_completion());
        assert_eq!(frame.psp_segment(), 0x0800);
        assert!(format!("{:?}", frame).starts_with("Frame { name: BuiltinName(\"DIR\")"));
    }
}
