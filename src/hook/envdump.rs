//! Parser for environment dumps captured around a sourced hook.
//!
//! The wrapper script dumps `export -p` before and after the hook runs.
//! That output is shell syntax, not line-oriented data: values can span
//! newlines, contain escaped quotes, or use ANSI-C `$'...'` quoting, and
//! declarations carry flag soup (`declare -rx`, `typeset -x`). A
//! hand-rolled tokenizer handles all of it; variables declared as arrays,
//! associative arrays, integers, or namerefs cannot round-trip as plain
//! strings and are skipped.

/// Parse a POSIX `export -p` dump into ordered key/value pairs.
pub fn parse_posix(input: &str) -> Vec<(String, String)> {
    Parser::new(input.as_bytes()).run()
}

/// Parse a Windows `SET` dump: plain `KEY=VALUE` lines, keys normalized
/// to uppercase.
pub fn parse_windows(input: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in input.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if !key.is_empty() {
                out.push((key.to_uppercase(), value.to_string()));
            }
        }
    }
    out
}

/// Parse a dump in the host's native format.
pub fn parse(input: &str, windows: bool) -> Vec<(String, String)> {
    if windows {
        parse_windows(input)
    } else {
        parse_posix(input)
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn run(mut self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        loop {
            self.skip_whitespace();
            if self.at_end() {
                break;
            }
            if let Some((key, value)) = self.parse_entry() {
                out.push((key, value));
            }
        }
        out
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    /// One `declare -x NAME="value"` style entry. Returns None when the
    /// declaration flags say the variable is not a plain string.
    fn parse_entry(&mut self) -> Option<(String, String)> {
        let mut skip = false;

        // Declaration prefix: `export`, `declare`/`typeset` plus flags.
        loop {
            let word = self.peek_word();
            match word.as_str() {
                "export" => {
                    self.consume_word();
                }
                "declare" | "typeset" => {
                    self.consume_word();
                    self.skip_spaces();
                    while self.peek() == Some(b'-') {
                        let flags = self.take_word();
                        if flags.bytes().any(|b| matches!(b, b'a' | b'A' | b'i' | b'n')) {
                            skip = true;
                        }
                        self.skip_spaces();
                    }
                }
                _ => break,
            }
            self.skip_spaces();
        }

        // Variable name, up to `=` or end of line.
        let mut key = Vec::new();
        while let Some(b) = self.peek() {
            if b == b'=' || b == b'\n' || b == b'\r' || b == b' ' || b == b'\t' {
                break;
            }
            key.push(b);
            self.pos += 1;
        }

        let value = if self.peek() == Some(b'=') {
            self.pos += 1;
            self.parse_value()
        } else {
            // `declare -x NAME` with no assignment: exported, empty.
            Vec::new()
        };

        if skip || key.is_empty() {
            return None;
        }
        Some((
            String::from_utf8_lossy(&key).into_owned(),
            String::from_utf8_lossy(&value).into_owned(),
        ))
    }

    fn peek_word(&self) -> String {
        let mut end = self.pos;
        while end < self.bytes.len() && !self.bytes[end].is_ascii_whitespace() {
            end += 1;
        }
        String::from_utf8_lossy(&self.bytes[self.pos..end]).into_owned()
    }

    fn consume_word(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
    }

    fn take_word(&mut self) -> String {
        let w = self.peek_word();
        self.consume_word();
        w
    }

    /// A value: concatenation of quoted and bare segments up to an
    /// unquoted newline. Array initializers `(...)` are consumed (so the
    /// parser stays in sync) but their content is discarded upstream.
    fn parse_value(&mut self) -> Vec<u8> {
        let mut value = Vec::new();
        loop {
            match self.peek() {
                None | Some(b'\n') | Some(b'\r') | Some(b' ') | Some(b'\t') => break,
                Some(b'"') => self.parse_double_quoted(&mut value),
                Some(b'\'') => self.parse_single_quoted(&mut value),
                Some(b'$') if self.bytes.get(self.pos + 1) == Some(&b'\'') => {
                    self.pos += 1;
                    self.parse_ansi_quoted(&mut value);
                }
                Some(b'(') => self.consume_paren_group(),
                Some(b'\\') => {
                    self.pos += 1;
                    if let Some(b) = self.bump() {
                        value.push(b);
                    }
                }
                Some(b) => {
                    value.push(b);
                    self.pos += 1;
                }
            }
        }
        value
    }

    fn parse_double_quoted(&mut self, out: &mut Vec<u8>) {
        self.pos += 1; // opening quote
        while let Some(b) = self.bump() {
            match b {
                b'"' => return,
                b'\\' => match self.bump() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b'r') => out.push(b'\r'),
                    Some(b't') => out.push(b'\t'),
                    Some(c @ (b'"' | b'\\' | b'$' | b'`')) => out.push(c),
                    Some(c) => {
                        out.push(b'\\');
                        out.push(c);
                    }
                    None => return,
                },
                // Literal newlines inside quotes are part of the value.
                _ => out.push(b),
            }
        }
    }

    fn parse_single_quoted(&mut self, out: &mut Vec<u8>) {
        self.pos += 1;
        while let Some(b) = self.bump() {
            if b == b'\'' {
                return;
            }
            out.push(b);
        }
    }

    /// Bash's `$'...'` form, used when a value contains control bytes.
    fn parse_ansi_quoted(&mut self, out: &mut Vec<u8>) {
        self.pos += 1; // opening quote
        while let Some(b) = self.bump() {
            match b {
                b'\'' => return,
                b'\\' => match self.bump() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b'r') => out.push(b'\r'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'0') => out.push(0),
                    Some(c @ (b'\'' | b'\\' | b'"')) => out.push(c),
                    Some(c) => {
                        out.push(b'\\');
                        out.push(c);
                    }
                    None => return,
                },
                _ => out.push(b),
            }
        }
    }

    /// Array initializers: `([0]="a" [1]="b")`. Consumed with quote
    /// awareness so a `)` inside a quoted element does not end the group.
    fn consume_paren_group(&mut self) {
        self.pos += 1; // opening paren
        let mut scratch = Vec::new();
        let mut depth = 1usize;
        while let Some(b) = self.peek() {
            match b {
                b'(' => {
                    depth += 1;
                    self.pos += 1;
                }
                b')' => {
                    depth -= 1;
                    self.pos += 1;
                    if depth == 0 {
                        return;
                    }
                }
                b'"' => self.parse_double_quoted(&mut scratch),
                b'\'' => self.parse_single_quoted(&mut scratch),
                _ => self.pos += 1,
            }
        }
    }
}
