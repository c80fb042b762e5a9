//! Environment block
//!
//! The environment a trampoline runs with: `NAME=value` strings, each
//! NUL-terminated, closed by an empty string, then a little-endian string
//! count and the path of the running program.

/// Decoded environment block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvBlock {
    vars: Vec<String>,
    program: Option<String>,
}

impl EnvBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a raw block
    ///
    /// Decoding stops quietly at the first missing terminator.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut env = Self::new();
        let mut rest = bytes;

        loop {
            let Some(end) = rest.iter().position(|&b| b == 0) else {
                return env;
            };
            let (entry, tail) = rest.split_at(end);
            rest = &tail[1..];
            if entry.is_empty() {
                break;
            }
            env.vars.push(latin1(entry));
        }

        let Some((count, tail)) = rest.split_first_chunk::<2>() else {
            return env;
        };
        if u16::from_le_bytes(*count) >= 1 {
            let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
            env.program = Some(latin1(&tail[..end]));
        }
        env
    }

    /// Add a `NAME=value` entry
    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.vars.push(format!("{}={}", name, value));
        self
    }

    /// Set the running program's path
    pub fn with_program(mut self, path: impl Into<String>) -> Self {
        self.program = Some(path.into());
        self
    }

    /// Look up a variable; the name is upper-cased before matching
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_uppercase();
        self.vars
            .iter()
            .find_map(|entry| entry.strip_prefix(name.as_str())?.strip_prefix('='))
    }

    /// Path of the running program
    pub fn program(&self) -> Option<&str> {
        self.program.as_deref()
    }

    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|s| s.as_str())
    }

    /// Encode back into the raw layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for var in &self.vars {
            out.extend(to_latin1(var));
            out.push(0);
        }
        out.push(0);
        if let Some(program) = &self.program {
            out.extend_from_slice(&1u16.to_le_bytes());
            out.extend(to_latin1(program));
            out.push(0);
        }
        out
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode as Latin-1; characters outside it become `?`
pub(crate) fn to_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &[u8] = b"PATH=C:\\DOS\0COMSPEC=C:\\COMMAND.COM\0\0\x01\x00C:\\BIN\\LREDIR.COM\0";

    #[test]
    fn test_parse() {
        let env = EnvBlock::parse(RAW);
        assert_eq!(env.vars().count(), 2);
        assert_eq!(env.get("PATH"), Some("C:\\DOS"));
        assert_eq!(env.program(), Some("C:\\BIN\\LREDIR.COM"));
    }

    #[test]
    fn test_get_upper_cases_name() {
        let env = EnvBlock::parse(RAW);
        assert_eq!(env.get("comspec"), Some("C:\\COMMAND.COM"));
        assert_eq!(env.get("COM"), None);
        assert_eq!(env.get("TEMP"), None);
    }

    #[test]
    fn test_lower_case_entries_not_matched() {
        let env = EnvBlock::new().with_var("windir", "C:\\WIN");
        assert_eq!(env.get("windir"), None);
    }

    #[test]
    fn test_parse_without_program() {
        let env = EnvBlock::parse(b"A=1\0\0\x00\x00");
        assert_eq!(env.get("A"), Some("1"));
        assert_eq!(env.program(), None);

        let env = EnvBlock::parse(b"A=1\0\0");
        assert_eq!(env.program(), None);
    }

    #[test]
    fn test_parse_truncated() {
        let env = EnvBlock::parse(b"A=1\0B=");
        assert_eq!(env.vars().collect::<Vec<_>>(), vec!["A=1"]);
        assert!(EnvBlock::parse(b"").vars().next().is_none());
    }

    #[test]
    fn test_encode_replaces_wide_chars() {
        let env = EnvBlock::new()
            .with_var("X", "\u{0141}\u{e9}")
            .with_program("C:\\\u{20ac}.COM");
        let back = EnvBlock::parse(&env.to_bytes());

        assert_eq!(back.get("X"), Some("?\u{e9}"));
        assert_eq!(back.program(), Some("C:\\?.COM"));
    }

    #[test]
    fn test_encode_matches_layout() {
        let env = EnvBlock::parse(RAW);
        assert_eq!(env.to_bytes(), RAW);

        let built = EnvBlock::new()
            .with_var("PATH", "C:\\DOS")
            .with_var("COMSPEC", "C:\\COMMAND.COM")
            .with_program("C:\\BIN\\LREDIR.COM");
        assert_eq!(built, env);
    }
}
