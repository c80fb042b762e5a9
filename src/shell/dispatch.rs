//! Trampoline entry
//!
//! A trampoline is a tiny stub program whose only job is to call into the
//! runtime. It does not say which builtin it stands for; the name comes from
//! the owner name in its memory control block, or failing that from its own
//! program path.

use super::builtins::NAME_CAPACITY;
use super::env::EnvBlock;
use super::error::{Rejection, SessionAbort};
use super::executor::{BuiltinRuntime, InvokeOutcome, InvokeRequest, ProgramLauncher};
use super::parser::CommandTail;
use crate::kernel::trace::{Level, TraceCategory};
use std::rc::Rc;

/// What the trampoline hands over
#[derive(Debug, Clone)]
pub struct TrampolineCall {
    /// Calling-convention version the trampoline was built for
    pub version: u8,
    /// Owner name from the trampoline's memory control block
    pub mcb_name: [u8; NAME_CAPACITY],
    pub env: EnvBlock,
    /// Length-prefixed command tail from the trampoline's PSP
    pub psp_tail: Vec<u8>,
    pub psp_segment: u16,
}

/// Work out which builtin a trampoline stands for
///
/// A printable MCB owner name wins. Otherwise the file name is taken from
/// the program path, cut to capacity and stripped of its extension.
pub fn resolve_builtin_name(mcb_name: &[u8; NAME_CAPACITY], program_path: &str) -> String {
    let owner: Vec<u8> = mcb_name.iter().copied().take_while(|&b| b != 0).collect();
    if owner.iter().all(|b| (0x20..0x7f).contains(b)) {
        return owner.iter().map(|&b| b as char).collect();
    }

    let file = program_path
        .rsplit_once('\\')
        .map_or(program_path, |(_, file)| file);
    let name: String = file.chars().take(NAME_CAPACITY).collect();
    match name.split_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => name,
    }
}

impl BuiltinRuntime {
    /// Entry point for trampolines
    ///
    /// Checks the calling convention, works out the builtin name and invokes it.
    pub fn dispatch(
        &mut self,
        call: TrampolineCall,
        launcher: Rc<dyn ProgramLauncher>,
    ) -> Result<InvokeOutcome, SessionAbort> {
        let required = self.config().plugin_version;
        if call.version != required {
            let outcome = self.reject(Rejection::VersionMismatch {
                found: call.version,
                required,
            });
            self.note(
                Level::Warning,
                TraceCategory::Invocation,
                "outdated_trampoline",
                None,
                "update the trampoline utilities to the ones shipped with this runtime".into(),
            );
            return Ok(outcome);
        }

        let program = call.env.program().unwrap_or_default().to_string();
        let name = resolve_builtin_name(&call.mcb_name, &program);
        let request = InvokeRequest::new(name, CommandTail::from_psp(&call.psp_tail))
            .arg0(program)
            .env(call.env)
            .launcher(launcher)
            .psp_segment(call.psp_segment);
        self.invoke(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::builtins::BuiltinResult;
    use crate::shell::executor::{BuiltinContext, NoLauncher};
    use std::cell::RefCell;

    fn mcb(name: &[u8]) -> [u8; NAME_CAPACITY] {
        let mut raw = [0u8; NAME_CAPACITY];
        raw[..name.len()].copy_from_slice(name);
        raw
    }

    fn call(version: u8, name: &[u8], tail: &[u8]) -> TrampolineCall {
        TrampolineCall {
            version,
            mcb_name: mcb(name),
            env: EnvBlock::new().with_program("C:\\BIN\\LREDIR.COM"),
            psp_tail: tail.to_vec(),
            psp_segment: 0x0800,
        }
    }

    #[test]
    fn test_name_from_mcb() {
        assert_eq!(resolve_builtin_name(&mcb(b"EMUFS"), "C:\\X.COM"), "EMUFS");
        assert_eq!(resolve_builtin_name(&mcb(b"SYSTEMXX"), ""), "SYSTEMXX");
    }

    #[test]
    fn test_name_from_path_when_mcb_unprintable() {
        let raw = mcb(b"\x01\x02");
        assert_eq!(resolve_builtin_name(&raw, "C:\\BIN\\LREDIR.COM"), "LREDIR");
        assert_eq!(resolve_builtin_name(&raw, "C:\\BIN\\UNIX.EXE"), "UNIX");
        assert_eq!(resolve_builtin_name(&raw, "C:\\LONGERNAME.COM"), "LONGERNA");
        assert_eq!(resolve_builtin_name(&raw, "NOPATH.COM"), "NOPATH");
    }

    #[test]
    fn test_dispatch_runs_builtin() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut rt = BuiltinRuntime::new();
        rt.register_fn("lredir", move |ctx: &mut BuiltinContext<'_>, args: &[String]| -> BuiltinResult {
            assert_eq!(ctx.name().as_str(), "LREDIR");
            sink.borrow_mut().extend_from_slice(args);
            Ok(0)
        });

        let outcome = rt
            .dispatch(call(4, b"LREDIR", b"\x06 X: /D\r"), Rc::new(NoLauncher))
            .unwrap();
        assert!(matches!(outcome, InvokeOutcome::Completed { status: 0, .. }));
        assert_eq!(*seen.borrow(), vec!["C:\\BIN\\LREDIR.COM", "X:", "/D"]);
    }

    #[test]
    fn test_dispatch_version_mismatch() {
        let mut rt = BuiltinRuntime::new();
        rt.register_fn("lredir", |_ctx, _args| Ok(0));

        let outcome = rt
            .dispatch(call(3, b"LREDIR", b"\x00"), Rc::new(NoLauncher))
            .unwrap();
        assert_eq!(
            outcome.rejection(),
            Some(&Rejection::VersionMismatch {
                found: 3,
                required: 4
            })
        );
        assert_eq!(rt.stats().invocations, 0);
        assert!(rt.tracer().find("outdated_trampoline").is_some());
    }

    #[test]
    fn test_dispatch_unknown_name() {
        let mut rt = BuiltinRuntime::new();
        let outcome = rt
            .dispatch(call(4, b"GHOST", b"\x00"), Rc::new(NoLauncher))
            .unwrap();
        assert_eq!(
            outcome.rejection(),
            Some(&Rejection::UnknownBuiltin {
                name: "GHOST".into()
            })
        );
    }
}
