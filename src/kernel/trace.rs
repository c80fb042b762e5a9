//! Diagnostics and Statistics
//!
//! Records what the invocation core did: which builtins ran, what they
//! allocated, which invocations were delegated, and every integrity problem
//! found along the way.
//!
//! Design:
//! - Bounded ring buffer of recent events
//! - Warnings and errors are always kept and echoed through `console_log!`
//! - Informational events are only kept in verbose mode
//! - Counters are always updated, independent of verbosity

use std::collections::VecDeque;

/// Default number of events kept in the ring buffer
pub const DEFAULT_TRACE_CAPACITY: usize = 256;

/// Trace event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceCategory {
    /// Name resolution, frame push/pop, handler results
    Invocation,
    /// Scratch pool allocation and integrity checks
    Memory,
    /// Program delegation and deferred completion
    Delegation,
    /// Session-level events (pool lifecycle, abort, exit requests)
    Session,
}

impl std::fmt::Display for TraceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceCategory::Invocation => write!(f, "INVOKE"),
            TraceCategory::Memory => write!(f, "MEMORY"),
            TraceCategory::Delegation => write!(f, "DELEGATE"),
            TraceCategory::Session => write!(f, "SESSION"),
        }
    }
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Info => write!(f, "info"),
            Level::Warning => write!(f, "warn"),
            Level::Error => write!(f, "error"),
        }
    }
}

/// A single trace event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Monotonic sequence number, assigned when recorded
    pub seq: u64,
    pub level: Level,
    pub category: TraceCategory,
    /// Event name/type
    pub name: String,
    /// Human-readable details
    pub detail: Option<String>,
    /// Builtin the event belongs to (if any)
    pub builtin: Option<String>,
}

impl TraceEvent {
    /// Create a new event
    pub fn new(level: Level, category: TraceCategory, name: impl Into<String>) -> Self {
        Self {
            seq: 0,
            level,
            category,
            name: name.into(),
            detail: None,
            builtin: None,
        }
    }

    /// Add details
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attribute the event to a builtin
    pub fn with_builtin(mut self, builtin: impl Into<String>) -> Self {
        self.builtin = Some(builtin.into());
        self
    }
}

impl std::fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} {}] {}", self.level, self.category, self.name)?;
        if let Some(builtin) = &self.builtin {
            write!(f, " ({})", builtin)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

/// Invocation-core counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Invocation requests received
    pub invocations: u64,
    /// Requests refused before a frame was pushed
    pub rejected: u64,
    /// Handlers that finished synchronously
    pub completed_sync: u64,
    /// Handlers that delegated to a program
    pub delegated: u64,
    /// Delegated frames finished by a completion call
    pub completed_delegated: u64,
    /// Size mismatches, invalid frees, oversized requests
    pub integrity_warnings: u64,
    /// Deepest frame stack observed
    pub peak_depth: usize,
    /// Highest pool usage observed
    pub peak_pool_used: usize,
    pub pools_created: u64,
    pub pools_destroyed: u64,
    /// Bytes still allocated at the most recent pool teardown
    pub last_leaked_bytes: usize,
    pub total_leaked_bytes: u64,
    pub aborts: u64,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_depth(&mut self, depth: usize) {
        self.peak_depth = self.peak_depth.max(depth);
    }

    pub fn record_pool_usage(&mut self, used: usize) {
        self.peak_pool_used = self.peak_pool_used.max(used);
    }

    pub fn record_leak(&mut self, leaked: usize) {
        self.pools_destroyed += 1;
        self.last_leaked_bytes = leaked;
        self.total_leaked_bytes += leaked as u64;
    }
}

impl std::fmt::Display for RuntimeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Builtin Statistics ===")?;
        writeln!(f, "Invocations: {}", self.invocations)?;
        writeln!(f, "Rejected: {}", self.rejected)?;
        writeln!(f, "Completed: {}", self.completed_sync)?;
        writeln!(
            f,
            "Delegated: {} ({} completed)",
            self.delegated, self.completed_delegated
        )?;
        writeln!(f, "Peak depth: {}", self.peak_depth)?;
        writeln!(f)?;
        writeln!(f, "--- Scratch pool ---")?;
        writeln!(f, "Created: {}", self.pools_created)?;
        writeln!(f, "Destroyed: {}", self.pools_destroyed)?;
        writeln!(f, "Peak usage: {} bytes", self.peak_pool_used)?;
        writeln!(f, "Leaked: {} bytes", self.total_leaked_bytes)?;
        writeln!(f, "Integrity warnings: {}", self.integrity_warnings)?;
        writeln!(f, "Aborts: {}", self.aborts)?;
        Ok(())
    }
}

/// The diagnostics sink
#[derive(Debug)]
pub struct Tracer {
    /// Keep informational events too
    verbose: bool,
    capacity: usize,
    events: VecDeque<TraceEvent>,
    next_seq: u64,
    pub stats: RuntimeStats,
}

impl Tracer {
    /// Create a tracer keeping at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            verbose: false,
            capacity,
            events: VecDeque::with_capacity(capacity),
            next_seq: 0,
            stats: RuntimeStats::new(),
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record an event
    ///
    /// Informational events are dropped unless verbose. Warnings and errors
    /// are also echoed to the host log.
    pub fn record(&mut self, mut event: TraceEvent) {
        if event.level == Level::Info && !self.verbose {
            return;
        }

        event.seq = self.next_seq;
        self.next_seq += 1;

        if event.level >= Level::Warning {
            echo(&event);
        }

        // Maintain ring buffer size
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Recent events, oldest first
    pub fn events(&self) -> &VecDeque<TraceEvent> {
        &self.events
    }

    pub fn events_by_category(&self, category: TraceCategory) -> Vec<&TraceEvent> {
        self.events
            .iter()
            .filter(|e| e.category == category)
            .collect()
    }

    /// Events at or above `level`
    pub fn events_at_least(&self, level: Level) -> Vec<&TraceEvent> {
        self.events.iter().filter(|e| e.level >= level).collect()
    }

    /// Most recent event with the given name
    pub fn find(&self, name: &str) -> Option<&TraceEvent> {
        self.events.iter().rev().find(|e| e.name == name)
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Reset everything (events and stats)
    pub fn reset(&mut self) {
        self.clear_events();
        self.stats = RuntimeStats::new();
    }
}

#[cfg(not(test))]
fn echo(event: &TraceEvent) {
    crate::console_log!("{}", event);
}

#[cfg(test)]
fn echo(_event: &TraceEvent) {}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracer_quiet_by_default() {
        let tracer = Tracer::default();
        assert!(!tracer.is_verbose());
        assert_eq!(tracer.capacity(), DEFAULT_TRACE_CAPACITY);
    }

    #[test]
    fn test_info_dropped_unless_verbose() {
        let mut tracer = Tracer::default();
        tracer.record(TraceEvent::new(
            Level::Info,
            TraceCategory::Invocation,
            "enter",
        ));
        assert!(tracer.events().is_empty());

        tracer.set_verbose(true);
        tracer.record(TraceEvent::new(
            Level::Info,
            TraceCategory::Invocation,
            "enter",
        ));
        assert_eq!(tracer.events().len(), 1);
    }

    #[test]
    fn test_warnings_always_kept() {
        let mut tracer = Tracer::default();
        tracer.record(
            TraceEvent::new(Level::Warning, TraceCategory::Memory, "free_size_mismatch")
                .with_builtin("DIR")
                .with_detail("found 16, requested 12"),
        );

        let event = tracer.find("free_size_mismatch").unwrap();
        assert_eq!(event.builtin.as_deref(), Some("DIR"));
        assert_eq!(
            event.to_string(),
            "[warn MEMORY] free_size_mismatch (DIR): found 16, requested 12"
        );
    }

    #[test]
    fn test_ring_buffer_limit() {
        let mut tracer = Tracer::new(3);
        for i in 0..5 {
            tracer.record(TraceEvent::new(
                Level::Error,
                TraceCategory::Session,
                format!("e{}", i),
            ));
        }

        let names: Vec<_> = tracer.events().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["e2", "e3", "e4"]);
        assert_eq!(tracer.events()[0].seq, 2);
    }

    #[test]
    fn test_filter_helpers() {
        let mut tracer = Tracer::default();
        tracer.set_verbose(true);
        tracer.record(TraceEvent::new(Level::Info, TraceCategory::Memory, "a"));
        tracer.record(TraceEvent::new(Level::Warning, TraceCategory::Memory, "b"));
        tracer.record(TraceEvent::new(Level::Error, TraceCategory::Session, "c"));

        assert_eq!(tracer.events_by_category(TraceCategory::Memory).len(), 2);
        assert_eq!(tracer.events_at_least(Level::Warning).len(), 2);
        assert_eq!(tracer.events_at_least(Level::Error).len(), 1);
    }

    #[test]
    fn test_stats_peaks() {
        let mut stats = RuntimeStats::new();
        stats.record_depth(3);
        stats.record_depth(1);
        stats.record_pool_usage(100);
        stats.record_pool_usage(40);
        stats.record_leak(12);
        stats.record_leak(0);

        assert_eq!(stats.peak_depth, 3);
        assert_eq!(stats.peak_pool_used, 100);
        assert_eq!(stats.pools_destroyed, 2);
        assert_eq!(stats.last_leaked_bytes, 0);
        assert_eq!(stats.total_leaked_bytes, 12);
    }

    #[test]
    fn test_reset() {
        let mut tracer = Tracer::default();
        tracer.record(TraceEvent::new(Level::Error, TraceCategory::Session, "x"));
        tracer.stats.invocations = 4;
        tracer.reset();
        assert!(tracer.events().is_empty());
        assert_eq!(tracer.stats, RuntimeStats::new());
    }
}
