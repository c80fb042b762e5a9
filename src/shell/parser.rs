//! Command tail parser
//!
//! Turns the raw command tail a caller hands over into the argument vector a
//! builtin sees. Three steps, always in this order:
//! 1. Cut the text at an embedded carriage return
//! 2. Normalize once: `DIR/P` becomes `DIR /P`, `CD..` becomes `CD ..`
//! 3. Split into arguments (whitespace separated, `'` and `"` quoting)
//!
//! Bytes map to characters one-to-one (Latin-1), so nothing here can fail.

/// Legacy end-of-line marker
pub const CR: u8 = b'\r';

/// Characters that may end the leading command word
const WORD_BREAKS: &[u8] = b"\\/. ";

/// Characters that make a following `.` a path token rather than a file extension
const PATH_CHARS: &[u8] = b"\\/.";

/// A mutable command tail with an explicit logical length
///
/// The buffer may hold bytes past the logical end (a terminator, padding);
/// they travel along when the normalizer shifts text right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTail {
    buf: Vec<u8>,
    len: usize,
}

impl CommandTail {
    /// A tail whose logical length covers all of `text`
    pub fn new(text: impl AsRef<[u8]>) -> Self {
        let buf = text.as_ref().to_vec();
        let len = buf.len();
        Self { buf, len }
    }

    /// Read a length-prefixed tail as stored in a program segment prefix
    ///
    /// A count larger than the bytes that follow is clamped.
    pub fn from_psp(raw: &[u8]) -> Self {
        let Some((&count, rest)) = raw.split_first() else {
            return Self::new(b"");
        };
        let len = (count as usize).min(rest.len());
        Self {
            buf: rest.to_vec(),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The logical text
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The logical text as a string
    pub fn text(&self) -> String {
        latin1(self.as_bytes())
    }

    /// Cut the logical text at the first NUL
    pub fn truncate_at_nul(&mut self) -> bool {
        self.truncate_at(0)
    }

    /// Cut the logical text at a carriage return inside it
    pub fn truncate_at_cr(&mut self) -> bool {
        self.truncate_at(CR)
    }

    fn truncate_at(&mut self, marker: u8) -> bool {
        match self.as_bytes().iter().position(|&b| b == marker) {
            Some(pos) => {
                self.len = pos;
                true
            }
            None => false,
        }
    }

    /// Separate the leading command word from a glued-on switch or path
    ///
    /// Finds the first of `\ / . space`. If it is not a space, and is not a
    /// plain `.` (one not followed by `\ / .`), a space is inserted in front
    /// of it. Returns whether a space was inserted. Runs at most once per
    /// call, on the first qualifying position only.
    pub fn normalize(&mut self) -> bool {
        let text = self.as_bytes();
        let Some(pos) = text.iter().position(|b| WORD_BREAKS.contains(b)) else {
            return false;
        };

        let ch = text[pos];
        if ch == b' ' {
            return false;
        }
        if ch == b'.' && !text.get(pos + 1).is_some_and(|next| PATH_CHARS.contains(next)) {
            return false;
        }

        self.buf.insert(pos, b' ');
        self.len += 1;
        true
    }

    /// Cut and normalize in place, ready for splitting
    pub fn prepare(&mut self) {
        self.truncate_at_nul();
        self.truncate_at_cr();
        self.normalize();
    }

    /// Collect up to `max_args` arguments
    ///
    /// The tail itself is left untouched.
    pub fn tokenize(&self, max_args: usize) -> Vec<String> {
        let mut tail = self.clone();
        tail.prepare();
        split_args(tail.as_bytes(), max_args)
    }
}

impl From<&str> for CommandTail {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// Lexer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lex {
    /// Skipping whitespace
    Between,
    /// Inside an unquoted argument starting at the given index
    Bare(usize),
    /// Inside a quoted argument
    Quoted { start: usize, delim: u8 },
    /// After a closing quote; skips to the next whitespace
    Closed,
}

/// Split already-prepared text into at most `max_args` arguments
///
/// Anything `<= ' '` is whitespace. A quote opens an argument that runs to
/// the matching quote; characters glued to the closing quote are skipped.
/// An unterminated quote runs to the end of the text.
pub fn split_args(text: &[u8], max_args: usize) -> Vec<String> {
    let mut args = Vec::new();
    let mut started = 0;
    let mut state = Lex::Between;

    for (i, &b) in text.iter().enumerate() {
        state = match state {
            Lex::Between if b <= b' ' => Lex::Between,
            Lex::Between => {
                if started == max_args {
                    break;
                }
                started += 1;
                match b {
                    b'"' | b'\'' => Lex::Quoted {
                        start: i + 1,
                        delim: b,
                    },
                    _ => Lex::Bare(i),
                }
            }
            Lex::Bare(start) if b <= b' ' => {
                args.push(latin1(&text[start..i]));
                Lex::Between
            }
            Lex::Quoted { start, delim } if b == delim => {
                args.push(latin1(&text[start..i]));
                Lex::Closed
            }
            Lex::Closed if b <= b' ' => Lex::Between,
            other => other,
        };
    }

    match state {
        Lex::Bare(start) | Lex::Quoted { start, .. } => args.push(latin1(&text[start..])),
        Lex::Between | Lex::Closed => {}
    }

    args
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
