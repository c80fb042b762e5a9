//! Builtin runtime
//!
//! Runs builtins on behalf of trampoline programs:
//! 1. Resolve the name and check the nesting limit
//! 2. Push a frame (the first frame also sets up the scratch pool)
//! 3. Tokenize the command tail and run the handler
//! 4. Pop the frame, or leave it awaiting completion if the handler handed
//!    its work to a program
//!
//! A delegated invocation is finished later by [`BuiltinRuntime::complete_current`],
//! which always targets the top frame. The pool is torn down, and leaks are
//! reported, when the last frame pops.

use super::builtins::{Builtin, BuiltinName, BuiltinRegistry, BuiltinResult};
use super::env::{EnvBlock, to_latin1};
use super::error::{AbortReason, BuiltinError, LaunchError, Rejection, SessionAbort};
use super::frame::{Delegation, Frame, FrameState};
use super::parser::CommandTail;
use crate::config::{ConfigError, RuntimeConfig};
use crate::kernel::abi::{
    self, CMDLINE_BUF_SIZE, EXEC_LOAD_AND_RUN, ExecRequest, FarPtr, PARAM_BLOCK_SIZE, ParamBlock,
};
use crate::kernel::memory::{MemoryError, PoolStats, ScratchPool, ScratchPtr};
use crate::kernel::trace::{Level, RuntimeStats, TraceCategory, TraceEvent, Tracer};
use futures::FutureExt;
use futures::channel::oneshot;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Command interpreter used by [`BuiltinContext::system`] when COMSPEC is unset
pub const DEFAULT_COMSPEC: &str = "C:\\COMMAND.COM";

/// Longest command line [`BuiltinContext::system`] passes on
const SYSTEM_CMDLINE_MAX: usize = 127;

/// Longest argv[0] a handler sees
const ARG0_MAX: usize = 255;

/// Status reported when a handler fails with an error
const HANDLER_FAILURE_STATUS: i32 = -1;

/// Starts programs on behalf of builtins
///
/// The launcher only starts the program. When it exits, the host calls
/// [`BuiltinRuntime::complete_current`].
pub trait ProgramLauncher {
    fn launch(&self, request: &ExecRequest) -> Result<(), LaunchError>;
}

/// Launcher for hosts that cannot start programs
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLauncher;

impl ProgramLauncher for NoLauncher {
    fn launch(&self, _request: &ExecRequest) -> Result<(), LaunchError> {
        Err(LaunchError::failed("no program launcher installed"))
    }
}

/// A request to run a builtin
pub struct InvokeRequest {
    name: String,
    arg0: String,
    tail: CommandTail,
    launcher: Rc<dyn ProgramLauncher>,
    env: Rc<EnvBlock>,
    psp_segment: u16,
}

impl InvokeRequest {
    /// argv[0] defaults to the name
    pub fn new(name: impl Into<String>, tail: impl Into<CommandTail>) -> Self {
        let name = name.into();
        Self {
            arg0: name.clone(),
            name,
            tail: tail.into(),
            launcher: Rc::new(NoLauncher),
            env: Rc::new(EnvBlock::new()),
            psp_segment: 0,
        }
    }

    pub fn arg0(mut self, arg0: impl Into<String>) -> Self {
        self.arg0 = arg0.into();
        self
    }

    pub fn launcher(mut self, launcher: Rc<dyn ProgramLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn env(mut self, env: EnvBlock) -> Self {
        self.env = Rc::new(env);
        self
    }

    pub fn psp_segment(mut self, segment: u16) -> Self {
        self.psp_segment = segment;
        self
    }
}

/// Return code of a delegated invocation, available once it completes
///
/// Resolves to `None` if the session is torn down first.
#[derive(Debug)]
pub struct Completion {
    builtin: BuiltinName,
    receiver: oneshot::Receiver<u16>,
}

impl Completion {
    pub fn builtin(&self) -> &BuiltinName {
        &self.builtin
    }

    /// The return code, if the invocation has completed
    pub fn try_take(&mut self) -> Option<u16> {
        self.receiver.try_recv().ok().flatten()
    }
}

impl Future for Completion {
    type Output = Option<u16>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.receiver.poll_unpin(cx).map(Result::ok)
    }
}

/// Result of an invocation request
#[derive(Debug)]
pub enum InvokeOutcome {
    /// Refused; no frame was pushed
    Rejected(Rejection),
    /// The handler handed its work to a program; the frame stays on the stack
    Delegated(Completion),
    /// The handler finished
    Completed { status: i32, return_code: u16 },
}

impl InvokeOutcome {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_delegated(&self) -> bool {
        matches!(self, Self::Delegated(_))
    }

    /// Return code of a synchronously finished invocation
    pub fn return_code(&self) -> Option<u16> {
        match self {
            Self::Completed { return_code, .. } => Some(*return_code),
            _ => None,
        }
    }
}

/// Result of a completion call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteOutcome {
    Completed {
        builtin: BuiltinName,
        return_code: u16,
    },
    /// No delegated invocation on top of the stack
    NothingPending,
}

/// Work the host must do once the current call returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    /// End the emulated session with this code
    ExitSession { code: i32 },
}

/// The invocation core
pub struct BuiltinRuntime {
    config: RuntimeConfig,
    registry: BuiltinRegistry,
    frames: Vec<Frame>,
    pool: Option<ScratchPool>,
    tracer: Tracer,
    post_actions: Vec<PostAction>,
    /// Handlers currently on the native call stack
    running_handlers: usize,
    aborted: Option<SessionAbort>,
}

impl BuiltinRuntime {
    pub fn new() -> Self {
        Self::build(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RuntimeConfig) -> Self {
        let mut tracer = Tracer::new(config.trace_capacity);
        tracer.set_verbose(config.verbose);
        Self {
            config,
            registry: BuiltinRegistry::new(),
            frames: Vec::new(),
            pool: None,
            tracer,
            post_actions: Vec::new(),
            running_handlers: 0,
            aborted: None,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &BuiltinRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BuiltinRegistry {
        &mut self.registry
    }

    pub fn register(&mut self, name: &str, builtin: impl Builtin + 'static) -> bool {
        self.registry.register(name, builtin)
    }

    pub fn register_fn<F>(&mut self, name: &str, handler: F) -> bool
    where
        F: Fn(&mut BuiltinContext<'_>, &[String]) -> BuiltinResult + 'static,
    {
        self.registry.register_fn(name, handler)
    }

    /// Number of frames alive
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Frames, bottom first
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn has_pool(&self) -> bool {
        self.pool.is_some()
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(|p| p.stats())
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.tracer.stats
    }

    /// The abort that ended the session, if any
    pub fn abort_state(&self) -> Option<&SessionAbort> {
        self.aborted.as_ref()
    }

    /// Drain queued post actions
    pub fn take_post_actions(&mut self) -> Vec<PostAction> {
        std::mem::take(&mut self.post_actions)
    }

    /// Run a builtin
    pub fn invoke(&mut self, request: InvokeRequest) -> Result<InvokeOutcome, SessionAbort> {
        self.check_session()?;
        self.tracer.stats.invocations += 1;

        let InvokeRequest {
            name,
            arg0,
            tail,
            launcher,
            env,
            psp_segment,
        } = request;

        let name = BuiltinName::new(&name);
        let Some(handler) = self.registry.resolve(name.as_str()) else {
            return Ok(self.reject(Rejection::UnknownBuiltin {
                name: name.to_string(),
            }));
        };
        if self.frames.len() >= self.config.max_nesting {
            return Ok(self.reject(Rejection::NestingLimit {
                max: self.config.max_nesting,
            }));
        }
        if self.frames.is_empty() {
            self.create_pool()?;
        }

        let mut args = Vec::with_capacity(self.config.max_tail_args + 1);
        args.push(
            arg0.chars()
                .take(ARG0_MAX)
                .map(|c| c.to_ascii_uppercase())
                .collect::<String>(),
        );
        args.extend(tail.tokenize(self.config.max_tail_args));

        let index = self.frames.len();
        self.frames
            .push(Frame::new(name.clone(), launcher, env, psp_segment));
        self.tracer.stats.record_depth(self.frames.len());
        self.note(
            Level::Info,
            TraceCategory::Invocation,
            "enter",
            Some(&name),
            format!("depth {}, argv {:?}", index + 1, args),
        );

        self.running_handlers += 1;
        let result = handler.run(&mut BuiltinContext { rt: self, index }, &args);
        self.running_handlers -= 1;

        if let Some(abort) = self.aborted.clone() {
            if self.running_handlers == 0 {
                self.teardown();
            }
            return Err(abort);
        }

        let status = match result {
            Ok(status) => status,
            Err(BuiltinError::Abort(abort)) => return Err(self.latch(abort)),
            Err(BuiltinError::Launch(e)) => {
                self.note(
                    Level::Warning,
                    TraceCategory::Invocation,
                    "handler_failed",
                    Some(&name),
                    e.to_string(),
                );
                HANDLER_FAILURE_STATUS
            }
        };

        Ok(self.finish_handler(index, status))
    }

    /// Finish the delegated invocation on top of the stack
    ///
    /// Reports its return code, releases its delegation artifacts and pops
    /// it (plus any finished frames below it).
    pub fn complete_current(&mut self) -> CompleteOutcome {
        let Some(index) = self.frames.len().checked_sub(1) else {
            return self.nothing_pending();
        };
        if self.frames[index].state != FrameState::AwaitingCompletion {
            return self.nothing_pending();
        }

        let frame = &mut self.frames[index];
        frame.state = FrameState::Completed;
        let return_code = frame.return_code;
        let name = frame.name.clone();
        if let Some(sender) = frame.completion.take() {
            // the caller may have dropped its Completion
            let _ = sender.send(return_code);
        }

        self.release_delegation(index, true);
        self.tracer.stats.completed_delegated += 1;
        self.note(
            Level::Info,
            TraceCategory::Delegation,
            "complete",
            Some(&name),
            format!("return code {}", return_code),
        );
        self.pop_completed();

        CompleteOutcome::Completed {
            builtin: name,
            return_code,
        }
    }

    /// Set the return code of the top frame
    ///
    /// Returns false if no frame is alive.
    pub fn set_current_return_code(&mut self, code: u16) -> bool {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.return_code = code;
                true
            }
            None => false,
        }
    }

    // ============ Frame lifecycle ============

    fn finish_handler(&mut self, index: usize, status: i32) -> InvokeOutcome {
        let frame = &mut self.frames[index];
        let name = frame.name.clone();

        if status == 0 && frame.owns_delegated_memory() {
            let (sender, receiver) = oneshot::channel();
            frame.state = FrameState::AwaitingCompletion;
            frame.completion = Some(sender);
            self.tracer.stats.delegated += 1;
            self.note(
                Level::Info,
                TraceCategory::Delegation,
                "awaiting_completion",
                Some(&name),
                format!("depth {}", index + 1),
            );
            return InvokeOutcome::Delegated(Completion {
                builtin: name,
                receiver,
            });
        }

        frame.state = FrameState::Completed;
        let return_code = frame.return_code;
        self.release_delegation(index, true);
        self.tracer.stats.completed_sync += 1;

        let pending_above = self.frames.len() - index - 1;
        if pending_above > 0 {
            self.note(
                Level::Warning,
                TraceCategory::Invocation,
                "finished_under_pending",
                Some(&name),
                format!("{} nested invocation(s) still pending", pending_above),
            );
        }
        self.note(
            Level::Info,
            TraceCategory::Invocation,
            "complete",
            Some(&name),
            format!("status {}, return code {}", status, return_code),
        );
        self.pop_completed();

        InvokeOutcome::Completed {
            status,
            return_code,
        }
    }

    /// Pop finished frames off the top; the last pop destroys the pool
    fn pop_completed(&mut self) {
        while self
            .frames
            .last()
            .is_some_and(|f| f.state == FrameState::Completed)
        {
            let Some(frame) = self.frames.pop() else {
                break;
            };
            self.note(
                Level::Info,
                TraceCategory::Invocation,
                "pop",
                Some(&frame.name),
                format!("depth {}", self.frames.len()),
            );
            if self.frames.is_empty() {
                self.destroy_pool(&frame.name);
            }
        }
    }

    /// Free a frame's delegation artifacts
    fn release_delegation(&mut self, index: usize, schedule_exit: bool) {
        let frame = &mut self.frames[index];
        let Some(delegation) = frame.delegation.take() else {
            return;
        };
        let name = frame.name.clone();
        let terminate = frame.terminate_on_completion;

        self.strfree_for(&name, delegation.program_path);
        self.free_for(&name, delegation.param_block, PARAM_BLOCK_SIZE);
        self.free_for(&name, delegation.cmd_line, CMDLINE_BUF_SIZE);

        if terminate && schedule_exit {
            self.post_actions.push(PostAction::ExitSession { code: 0 });
            self.note(
                Level::Info,
                TraceCategory::Session,
                "exit_scheduled",
                Some(&name),
                String::new(),
            );
        }
    }

    fn nothing_pending(&mut self) -> CompleteOutcome {
        self.note(
            Level::Warning,
            TraceCategory::Delegation,
            "nothing_pending",
            None,
            "completion requested with no delegated invocation".into(),
        );
        CompleteOutcome::NothingPending
    }

    /// Refuse a request; the diagnostic names the calling frame, if any
    pub(crate) fn reject(&mut self, rejection: Rejection) -> InvokeOutcome {
        self.tracer.stats.rejected += 1;
        let caller = self.frames.last().map(|f| f.name.clone());
        self.note(
            Level::Warning,
            TraceCategory::Invocation,
            "rejected",
            caller.as_ref(),
            rejection.to_string(),
        );
        InvokeOutcome::Rejected(rejection)
    }

    // ============ Session ============

    fn check_session(&self) -> Result<(), SessionAbort> {
        match &self.aborted {
            Some(abort) => Err(abort.clone()),
            None => Ok(()),
        }
    }

    fn create_pool(&mut self) -> Result<(), SessionAbort> {
        match ScratchPool::new(self.config.pool_size) {
            Ok(pool) => {
                self.pool = Some(pool);
                self.tracer.stats.pools_created += 1;
                self.note(
                    Level::Info,
                    TraceCategory::Session,
                    "pool_created",
                    None,
                    format!("{} bytes", self.config.pool_size),
                );
                Ok(())
            }
            Err(_) => Err(self.raise(AbortReason::PoolUnavailable {
                capacity: self.config.pool_size,
            })),
        }
    }

    fn destroy_pool(&mut self, last: &BuiltinName) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        let leaked = pool.destroy();
        self.tracer.stats.record_leak(leaked);
        if leaked > 0 {
            self.integrity(last, "leak", format!("leaked {} bytes", leaked));
        } else {
            self.note(
                Level::Info,
                TraceCategory::Session,
                "pool_destroyed",
                Some(last),
                String::new(),
            );
        }
    }

    fn raise(&mut self, reason: AbortReason) -> SessionAbort {
        self.latch(SessionAbort::new(reason))
    }

    /// Record a session abort; teardown waits until no handler is running
    fn latch(&mut self, abort: SessionAbort) -> SessionAbort {
        if let Some(existing) = &self.aborted {
            return existing.clone();
        }

        self.tracer.stats.aborts += 1;
        self.tracer.record(
            TraceEvent::new(Level::Error, TraceCategory::Session, "abort")
                .with_detail(abort.to_string()),
        );
        self.aborted = Some(abort.clone());
        if self.running_handlers == 0 {
            self.teardown();
        }
        abort
    }

    fn teardown(&mut self) {
        let Some(code) = self.aborted.as_ref().map(|a| a.code) else {
            return;
        };

        let discarded = self.frames.len();
        let bottom = self.frames.first().map(|f| f.name.clone());
        // dropping the frames cancels any outstanding Completion
        self.frames.clear();
        if let Some(pool) = self.pool.take() {
            let leaked = pool.destroy();
            self.tracer.stats.record_leak(leaked);
            if leaked > 0 {
                self.tracer.stats.integrity_warnings += 1;
                self.note(
                    Level::Warning,
                    TraceCategory::Memory,
                    "leak",
                    bottom.as_ref(),
                    format!("leaked {} bytes", leaked),
                );
            }
        }
        self.post_actions.push(PostAction::ExitSession { code });
        self.note(
            Level::Error,
            TraceCategory::Session,
            "teardown",
            bottom.as_ref(),
            format!("discarded {} frame(s), exit {}", discarded, code),
        );
    }

    // ============ Scratch memory ============

    fn alloc_for(&mut self, builtin: &BuiltinName, size: usize) -> Result<ScratchPtr, SessionAbort> {
        self.check_session()?;
        let Some(pool) = self.pool.as_mut() else {
            return Err(self.raise(AbortReason::PoolUnavailable {
                capacity: self.config.pool_size,
            }));
        };

        match pool.allocate(size) {
            Ok(ptr) => {
                let used = pool.used();
                self.tracer.stats.record_pool_usage(used);
                if size > self.config.heap_warn_threshold {
                    self.integrity(
                        builtin,
                        "oversized_request",
                        format!("requests too much of a heap: {:#x}", size),
                    );
                }
                Ok(ptr)
            }
            Err(MemoryError::OutOfMemory {
                requested,
                largest_free,
            }) => Err(self.raise(AbortReason::ScratchExhausted {
                builtin: builtin.to_string(),
                requested,
                available: largest_free,
            })),
            Err(_) => Err(self.raise(AbortReason::InvalidRequest {
                builtin: builtin.to_string(),
            })),
        }
    }

    fn free_for(&mut self, builtin: &BuiltinName, ptr: ScratchPtr, size: usize) {
        let Some(pool) = self.pool.as_mut() else {
            self.integrity(builtin, "invalid_free", "no scratch pool".into());
            return;
        };

        match pool.free(ptr, size) {
            Ok(outcome) if outcome.is_mismatch() => self.integrity(
                builtin,
                "free_size_mismatch",
                format!("found {}, requested {}", outcome.recorded, outcome.expected),
            ),
            Ok(_) => {}
            Err(e) => self.integrity(builtin, "invalid_free", e.to_string()),
        }
    }

    /// Copy a string into scratch memory as `[len] text NUL`
    fn strdup_for(&mut self, builtin: &BuiltinName, text: &[u8]) -> Result<ScratchPtr, SessionAbort> {
        let max = self.config.max_string_len;
        let text = if text.len() > max {
            self.integrity(
                builtin,
                "string_too_long",
                format!("lowstring too long: {} bytes", text.len()),
            );
            &text[..max]
        } else {
            text
        };

        let ptr = self.alloc_for(builtin, text.len() + 2)?;
        if let Some(block) = self.pool.as_mut().and_then(|p| p.bytes_mut(ptr)) {
            block[0] = text.len() as u8;
            block[1..1 + text.len()].copy_from_slice(text);
        }
        Ok(ptr)
    }

    /// Free a string made by `strdup_for`, sizing it from its length byte
    fn strfree_for(&mut self, builtin: &BuiltinName, ptr: ScratchPtr) {
        let len = self
            .pool
            .as_ref()
            .and_then(|p| p.bytes(ptr))
            .and_then(|b| b.first().copied());
        match len {
            Some(len) => self.free_for(builtin, ptr, len as usize + 2),
            None => self.integrity(builtin, "invalid_free", MemoryError::InvalidPointer.to_string()),
        }
    }

    fn read_string(&self, ptr: ScratchPtr) -> Option<String> {
        let block = self.pool.as_ref()?.bytes(ptr)?;
        let (&len, text) = block.split_first()?;
        let text = text.get(..len as usize)?;
        Some(text.iter().map(|&b| b as char).collect())
    }

    fn write_scratch(&mut self, ptr: ScratchPtr, data: &[u8]) {
        if let Some(block) = self.pool.as_mut().and_then(|p| p.bytes_mut(ptr)) {
            let n = data.len().min(block.len());
            block[..n].copy_from_slice(&data[..n]);
        }
    }

    /// Segmented address of a scratch allocation
    fn far_ptr(&self, ptr: ScratchPtr) -> FarPtr {
        FarPtr::new(
            self.config.heap_segment,
            self.config.heap_offset.wrapping_add(ptr.offset()),
        )
    }

    // ============ Delegation ============

    fn delegate(&mut self, index: usize, program: &str, cmdline: &str) -> Result<(), BuiltinError> {
        let name = self.frames[index].name.clone();
        if self.frames[index].owns_delegated_memory() {
            return Err(LaunchError::AlreadyDelegated {
                builtin: name.to_string(),
            }
            .into());
        }

        let param_block = self.alloc_for(&name, PARAM_BLOCK_SIZE)?;
        let program_path = self.strdup_for(&name, &to_latin1(program))?;
        let cmd_line = self.alloc_for(&name, CMDLINE_BUF_SIZE)?;

        let tail = abi::encode_command_tail(&to_latin1(cmdline));
        self.write_scratch(cmd_line, &tail);
        let block = ParamBlock::for_child(self.frames[index].psp_segment, self.far_ptr(cmd_line));
        self.write_scratch(param_block, block.as_bytes());

        let request = ExecRequest {
            function: EXEC_LOAD_AND_RUN,
            // skip the length byte
            program: self.far_ptr(program_path).add(1),
            param_block: self.far_ptr(param_block),
            program_path: self.read_string(program_path).unwrap_or_default(),
            command_tail: tail.to_vec(),
        };
        self.frames[index].delegation = Some(Delegation {
            param_block,
            program_path,
            cmd_line,
        });

        let launcher = Rc::clone(&self.frames[index].launcher);
        match launcher.launch(&request) {
            Ok(()) => {
                self.note(
                    Level::Info,
                    TraceCategory::Delegation,
                    "launched",
                    Some(&name),
                    format!("{} {}", request.program_path, request.tail_text()),
                );
                Ok(())
            }
            Err(e) => {
                self.release_delegation(index, false);
                self.note(
                    Level::Warning,
                    TraceCategory::Delegation,
                    "launch_failed",
                    Some(&name),
                    e.to_string(),
                );
                Err(e.into())
            }
        }
    }

    fn system(&mut self, index: usize, command: &str, quit: bool) -> Result<(), BuiltinError> {
        let program = self.frames[index]
            .env
            .get("COMSPEC")
            .unwrap_or(DEFAULT_COMSPEC)
            .to_string();
        let mut cmdline = format!("/E:2048 /C {}", command);
        if let Some((cut, _)) = cmdline.char_indices().nth(SYSTEM_CMDLINE_MAX) {
            cmdline.truncate(cut);
        }

        self.delegate(index, &program, &cmdline)?;
        self.frames[index].terminate_on_completion = quit;
        Ok(())
    }

    // ============ Diagnostics ============

    pub(crate) fn note(
        &mut self,
        level: Level,
        category: TraceCategory,
        event: &str,
        builtin: Option<&BuiltinName>,
        detail: String,
    ) {
        let mut event = TraceEvent::new(level, category, event);
        if let Some(builtin) = builtin {
            event = event.with_builtin(builtin.as_str());
        }
        if !detail.is_empty() {
            event = event.with_detail(detail);
        }
        self.tracer.record(event);
    }

    /// Report a scratch-memory integrity problem
    fn integrity(&mut self, builtin: &BuiltinName, event: &str, detail: String) {
        self.tracer.stats.integrity_warnings += 1;
        self.note(
            Level::Warning,
            TraceCategory::Memory,
            event,
            Some(builtin),
            detail,
        );
    }
}

impl Default for BuiltinRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// What a running builtin can do
///
/// Every operation acts on the builtin's own frame.
pub struct BuiltinContext<'rt> {
    rt: &'rt mut BuiltinRuntime,
    index: usize,
}

impl BuiltinContext<'_> {
    fn frame(&self) -> &Frame {
        &self.rt.frames[self.index]
    }

    pub fn name(&self) -> &BuiltinName {
        &self.frame().name
    }

    /// Stack depth of this invocation (1 for the outermost)
    pub fn depth(&self) -> usize {
        self.index + 1
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.rt.config
    }

    /// Allocate zeroed scratch memory
    pub fn alloc(&mut self, size: usize) -> Result<ScratchPtr, SessionAbort> {
        let name = self.frame().name.clone();
        self.rt.alloc_for(&name, size)
    }

    /// Free scratch memory, stating the size it was allocated with
    pub fn free(&mut self, ptr: ScratchPtr, size: usize) {
        let name = self.frame().name.clone();
        self.rt.free_for(&name, ptr, size);
    }

    pub fn bytes(&self, ptr: ScratchPtr) -> Option<&[u8]> {
        self.rt.pool.as_ref()?.bytes(ptr)
    }

    pub fn bytes_mut(&mut self, ptr: ScratchPtr) -> Option<&mut [u8]> {
        self.rt.pool.as_mut()?.bytes_mut(ptr)
    }

    /// Size a scratch block was allocated with
    pub fn size_of(&self, ptr: ScratchPtr) -> Option<usize> {
        self.rt.pool.as_ref()?.size_of(ptr)
    }

    /// Address of a scratch block as the emulated program sees it
    pub fn far_ptr(&self, ptr: ScratchPtr) -> FarPtr {
        self.rt.far_ptr(ptr)
    }

    /// Copy a string into scratch memory
    ///
    /// Strings over the configured maximum are cut and reported.
    pub fn strdup(&mut self, text: &str) -> Result<ScratchPtr, SessionAbort> {
        let name = self.frame().name.clone();
        self.rt.strdup_for(&name, &to_latin1(text))
    }

    pub fn strfree(&mut self, ptr: ScratchPtr) {
        let name = self.frame().name.clone();
        self.rt.strfree_for(&name, ptr);
    }

    /// Read back a string made by [`strdup`](Self::strdup)
    pub fn read_str(&self, ptr: ScratchPtr) -> Option<String> {
        self.rt.read_string(ptr)
    }

    pub fn getenv(&self, name: &str) -> Option<&str> {
        self.frame().env.get(name)
    }

    /// Path of the program that invoked the builtin
    pub fn program_path(&self) -> Option<&str> {
        self.frame().env.program()
    }

    pub fn return_code(&self) -> u16 {
        self.frame().return_code
    }

    pub fn set_return_code(&mut self, code: u16) {
        self.rt.frames[self.index].return_code = code;
    }

    /// Hand the builtin's work to a program
    ///
    /// On success the handler should return `Ok(0)`; the invocation then
    /// waits for [`BuiltinRuntime::complete_current`].
    pub fn run_program(&mut self, program: &str, cmdline: &str) -> Result<(), BuiltinError> {
        self.rt.delegate(self.index, program, cmdline)
    }

    /// Run a command through the command interpreter
    ///
    /// With `quit`, the session ends once the command completes.
    pub fn system(&mut self, command: &str, quit: bool) -> Result<(), BuiltinError> {
        self.rt.system(self.index, command, quit)
    }

    /// Run another builtin from inside this one
    pub fn invoke(&mut self, request: InvokeRequest) -> Result<InvokeOutcome, SessionAbort> {
        self.rt.invoke(request)
    }

    /// Report an error on behalf of the builtin
    pub fn error(&mut self, message: impl Into<String>) {
        let name = self.frame().name.clone();
        self.rt.note(
            Level::Warning,
            TraceCategory::Invocation,
            "builtin_error",
            Some(&name),
            message.into(),
        );
    }
}
