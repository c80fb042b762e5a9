//! Builtin registry
//!
//! Builtins are resident handlers invoked in place of a loaded program. The
//! host registers them by name at startup; lookups ignore case.

use super::error::BuiltinError;
use super::executor::BuiltinContext;
use std::collections::HashMap;
use std::rc::Rc;

/// Longest builtin name the trampoline can carry
pub const NAME_CAPACITY: usize = 8;

/// Result of a builtin handler: a status (0 = success) or an error
pub type BuiltinResult = Result<i32, BuiltinError>;

/// Case-normalized builtin name, at most [`NAME_CAPACITY`] characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuiltinName(String);

impl BuiltinName {
    /// Truncate to capacity and upper-case
    pub fn new(raw: &str) -> Self {
        let name: String = raw
            .chars()
            .take(NAME_CAPACITY)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BuiltinName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resident command
///
/// `args[0]` is the upper-cased invocation name; the rest come from the
/// tokenized command tail. Returning `Ok(0)` after delegating through
/// [`BuiltinContext::run_program`] leaves the invocation awaiting completion.
pub trait Builtin {
    fn run(&self, ctx: &mut BuiltinContext<'_>, args: &[String]) -> BuiltinResult;
}

impl<F> Builtin for F
where
    F: Fn(&mut BuiltinContext<'_>, &[String]) -> BuiltinResult,
{
    fn run(&self, ctx: &mut BuiltinContext<'_>, args: &[String]) -> BuiltinResult {
        self(ctx, args)
    }
}

/// Name to handler table
pub struct BuiltinRegistry {
    entries: HashMap<String, Rc<dyn Builtin>>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a handler, replacing any existing one with the same name
    ///
    /// The name is normalized like an invocation name, so only the first
    /// [`NAME_CAPACITY`] characters count. Returns true if an earlier
    /// registration was replaced.
    pub fn register(&mut self, name: &str, builtin: impl Builtin + 'static) -> bool {
        self.entries.insert(key(name), Rc::new(builtin)).is_some()
    }

    /// Register a closure
    pub fn register_fn<F>(&mut self, name: &str, handler: F) -> bool
    where
        F: Fn(&mut BuiltinContext<'_>, &[String]) -> BuiltinResult + 'static,
    {
        self.register(name, handler)
    }

    /// Find the handler for `name`, ignoring case
    pub fn resolve(&self, name: &str) -> Option<Rc<dyn Builtin>> {
        self.entries.get(&key(name)).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&key(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.entries.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }
}

fn key(name: &str) -> String {
    BuiltinName::new(name).0
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(_ctx: &mut BuiltinContext<'_>, _args: &[String]) -> BuiltinResult {
        Ok(0)
    }

    fn fail(_ctx: &mut BuiltinContext<'_>, _args: &[String]) -> BuiltinResult {
        Ok(1)
    }

    struct Unit;

    impl Builtin for Unit {
        fn run(&self, _ctx: &mut BuiltinContext<'_>, _args: &[String]) -> BuiltinResult {
            Ok(0)
        }
    }

    #[test]
    fn test_name_normalized() {
        assert_eq!(BuiltinName::new("dir").as_str(), "DIR");
        assert_eq!(BuiltinName::new("lredir2x9").as_str(), "LREDIR2X");
        assert_eq!(BuiltinName::new("").as_str(), "");
        assert_eq!(BuiltinName::new("Cd").to_string(), "CD");
    }

    #[test]
    fn test_lookup_ignores_case() {
        let mut reg = BuiltinRegistry::new();
        reg.register("dir", ok);

        assert!(reg.contains("DIR"));
        assert!(reg.contains("Dir"));
        assert!(reg.resolve("dIr").is_some());
        assert!(reg.resolve("COPY").is_none());
    }

    #[test]
    fn test_register_replaces() {
        let mut reg = BuiltinRegistry::new();
        assert!(!reg.register("DIR", ok));
        assert!(reg.register("dir", fail));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_long_names_truncated() {
        let mut reg = BuiltinRegistry::new();
        reg.register("emumouse2", ok);

        assert_eq!(reg.names(), vec!["EMUMOUSE"]);
        assert!(reg.contains("EMUMOUSE"));
        assert!(reg.resolve("emumouse2").is_some());
        assert!(reg.register("EMUMOUSEX", fail));
    }

    #[test]
    fn test_register_kinds() {
        let mut reg = BuiltinRegistry::new();
        reg.register("unit", Unit);
        reg.register_fn("closure", |_ctx, args| Ok(args.len() as i32));
        reg.register("fn", ok);

        assert_eq!(reg.names(), vec!["CLOSURE", "FN", "UNIT"]);
    }

    #[test]
    fn test_contains() {
        let mut reg = BuiltinRegistry::default();
        assert!(reg.is_empty());
        reg.register("EMUFS", ok);
        assert!(reg.contains("emufs"));
        assert!(!reg.contains("emu"));
        assert_eq!(reg.len(), 1);
    }
}
