//! Streaming secret redaction.
//!
//! Everything a job writes passes through a `Redactor` before it reaches
//! the log pipeline. The redactor holds a set of literal secret values
//! and replaces every occurrence with `[REDACTED]`, including occurrences
//! that straddle write boundaries: a sliding buffer of at most
//! `max(len(secret)) - 1` bytes holds back any suffix that could still
//! grow into a secret.
//!
//! When one secret is a proper prefix of another, the shorter one wins at
//! that position (shortest-match policy; see the test of the same name).

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::env::Environment;

/// Replacement marker emitted in place of each secret occurrence.
pub const REDACTED: &str = "[REDACTED]";

/// Values shorter than this leak too little to be worth redacting and
/// would shred ordinary output (think secrets like "1"), so they are
/// skipped.
pub const MIN_SECRET_LEN: usize = 6;

/// A `Write` adapter that replaces secret values on the way through.
pub struct Redactor<W: Write> {
    inner: W,
    secrets: Vec<Vec<u8>>,
    buf: Vec<u8>,
}

impl<W: Write> Redactor<W> {
    pub fn new(inner: W, secrets: impl IntoIterator<Item = String>) -> Self {
        let mut r = Self {
            inner,
            secrets: Vec::new(),
            buf: Vec::new(),
        };
        r.set_secrets(secrets);
        r
    }

    fn set_secrets(&mut self, secrets: impl IntoIterator<Item = String>) {
        self.secrets = secrets
            .into_iter()
            .filter(|s| {
                if s.len() < MIN_SECRET_LEN {
                    tracing::warn!(len = s.len(), "ignoring too-short redaction value");
                    false
                } else {
                    true
                }
            })
            .map(String::into_bytes)
            .collect();
    }

    /// Register one more secret. Bytes already buffered are drained under
    /// the old set first, so the new value applies from this point on.
    pub fn add_secret(&mut self, secret: &str) -> std::io::Result<()> {
        self.drain(true)?;
        if secret.len() < MIN_SECRET_LEN {
            tracing::warn!(len = secret.len(), "ignoring too-short redaction value");
            return Ok(());
        }
        self.secrets.push(secret.as_bytes().to_vec());
        Ok(())
    }

    /// Atomically replace the secret set. Buffered pre-reset bytes are
    /// emitted under the old set before the swap.
    pub fn reset(&mut self, secrets: impl IntoIterator<Item = String>) -> std::io::Result<()> {
        self.drain(true)?;
        self.set_secrets(secrets);
        Ok(())
    }

    /// End-of-stream: a held-back partial prefix can no longer become a
    /// secret, so it is emitted verbatim.
    pub fn finish(&mut self) -> std::io::Result<()> {
        self.drain(true)?;
        self.inner.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Shortest full match at `pos`, if any.
    fn match_at(&self, pos: usize) -> Option<usize> {
        self.secrets
            .iter()
            .filter(|s| self.buf[pos..].starts_with(s))
            .map(Vec::len)
            .min()
    }

    /// Could the buffer suffix starting at `pos` still grow into a secret
    /// with more input?
    fn partial_at(&self, pos: usize) -> bool {
        let rest = &self.buf[pos..];
        self.secrets
            .iter()
            .any(|s| s.len() > rest.len() && s.starts_with(rest))
    }

    /// Push everything that is decidable downstream. With `final_` set,
    /// partial prefixes are decided as non-secrets.
    fn drain(&mut self, final_: bool) -> std::io::Result<()> {
        let mut out: Vec<u8> = Vec::with_capacity(self.buf.len());
        let mut i = 0;
        while i < self.buf.len() {
            if let Some(len) = self.match_at(i) {
                out.extend_from_slice(REDACTED.as_bytes());
                i += len;
            } else if !final_ && self.partial_at(i) {
                break;
            } else {
                out.push(self.buf[i]);
                i += 1;
            }
        }
        self.buf.drain(..i);
        if !out.is_empty() {
            self.inner.write_all(&out)?;
        }
        Ok(())
    }
}

impl<W: Write> Write for Redactor<W> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        self.drain(false)?;
        Ok(data.len())
    }

    /// Forces every buffered byte known not to start a secret through to
    /// the downstream writer. A still-possible secret prefix stays held.
    fn flush(&mut self) -> std::io::Result<()> {
        self.drain(false)?;
        self.inner.flush()
    }
}

/// A cloneable, thread-safe handle over a boxed redactor. The shell's
/// output pump writes through it while Job API handlers add secrets.
#[derive(Clone)]
pub struct RedactorHandle {
    inner: Arc<Mutex<Redactor<Box<dyn Write + Send>>>>,
}

impl RedactorHandle {
    pub fn new(
        downstream: Box<dyn Write + Send>,
        secrets: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Redactor::new(downstream, secrets))),
        }
    }

    pub fn add_secret(&self, secret: &str) -> std::io::Result<()> {
        self.lock().add_secret(secret)
    }

    pub fn reset(&self, secrets: impl IntoIterator<Item = String>) -> std::io::Result<()> {
        self.lock().reset(secrets)
    }

    pub fn finish(&self) -> std::io::Result<()> {
        self.lock().finish()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Redactor<Box<dyn Write + Send>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Write for RedactorHandle {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.lock().write(data)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.lock().flush()
    }
}

/// Resolve the environment values that must be redacted: every variable
/// whose name matches one of the operator's patterns (`*_TOKEN` style
/// globs or literal names).
pub fn values_to_redact(patterns: &[String], env: &Environment) -> Vec<String> {
    let compiled: Vec<glob::Pattern> = patterns
        .iter()
        .filter_map(|p| match glob::Pattern::new(p) {
            Ok(pat) => Some(pat),
            Err(e) => {
                tracing::warn!(pattern = %p, error = %e, "ignoring bad redacted-vars pattern");
                None
            }
        })
        .collect();
    env.iter()
        .filter(|(k, v)| !v.is_empty() && compiled.iter().any(|p| p.matches(k)))
        .map(|(_, v)| v.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redact_writes(secrets: &[&str], writes: &[&[u8]]) -> String {
        let mut r = Redactor::new(
            Vec::new(),
            secrets.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        );
        for w in writes {
            r.write_all(w).unwrap();
        }
        r.finish().unwrap();
        String::from_utf8(r.get_ref().clone()).unwrap()
    }

    #[test]
    fn redacts_single_occurrence() {
        assert_eq!(
            redact_writes(&["secret1111"], &[b"a secret1111 b"]),
            "a [REDACTED] b"
        );
    }

    #[test]
    fn redacts_byte_by_byte_writes() {
        // Ten single-byte writes spelling the secret, then flush: the
        // downstream sees exactly one marker.
        let secret = b"secret1111";
        let mut r = Redactor::new(Vec::new(), vec!["secret1111".to_string()]);
        for b in secret {
            r.write_all(&[*b]).unwrap();
        }
        r.flush().unwrap();
        assert_eq!(r.get_ref().as_slice(), REDACTED.as_bytes());
    }

    #[test]
    fn redacts_across_a_write_boundary() {
        assert_eq!(
            redact_writes(&["supersecret"], &[b"before super", b"secret after"]),
            "before [REDACTED] after"
        );
    }

    #[test]
    fn redacts_multiple_secrets_and_repeats() {
        assert_eq!(
            redact_writes(&["aaaaaa", "bbbbbb"], &[b"aaaaaa bbbbbb aaaaaa"]),
            "[REDACTED] [REDACTED] [REDACTED]"
        );
    }

    #[test]
    fn shortest_match_policy_when_one_secret_prefixes_another() {
        // Known limitation: with secrets {"secret", "secret-extended"},
        // the shorter wins at the shared position and the tail of the
        // longer one passes through.
        assert_eq!(
            redact_writes(&["secret", "secret-extended"], &[b"x secret-extended y"]),
            "x [REDACTED]-extended y"
        );
    }

    #[test]
    fn flush_releases_safe_bytes_but_holds_partial_prefix() {
        let mut r = Redactor::new(Vec::new(), vec!["secret1111".to_string()]);
        r.write_all(b"hello sec").unwrap();
        r.flush().unwrap();
        // "hello " is safe; "sec" might still become the secret.
        assert_eq!(r.get_ref().as_slice(), b"hello ");
        r.write_all(b"ret1111").unwrap();
        r.finish().unwrap();
        assert_eq!(r.get_ref().as_slice(), b"hello [REDACTED]");
    }

    #[test]
    fn finish_emits_trailing_non_secret_bytes() {
        assert_eq!(redact_writes(&["secret1111"], &[b"ends with sec"]), "ends with sec");
    }

    #[test]
    fn too_short_secrets_are_ignored() {
        assert_eq!(redact_writes(&["hi"], &[b"hi there"]), "hi there");
    }

    #[test]
    fn add_secret_applies_from_now_on() {
        let mut r = Redactor::new(Vec::new(), Vec::<String>::new());
        r.write_all(b"tok123 early ").unwrap();
        r.add_secret("tok123").unwrap();
        r.write_all(b"tok123 late").unwrap();
        r.finish().unwrap();
        assert_eq!(
            String::from_utf8(r.get_ref().clone()).unwrap(),
            "tok123 early [REDACTED] late"
        );
    }

    #[test]
    fn reset_swaps_the_secret_set() {
        let mut r = Redactor::new(Vec::new(), vec!["oldsecret".to_string()]);
        r.write_all(b"oldsecret ").unwrap();
        r.reset(vec!["newsecret".to_string()]).unwrap();
        r.write_all(b"oldsecret newsecret").unwrap();
        r.finish().unwrap();
        assert_eq!(
            String::from_utf8(r.get_ref().clone()).unwrap(),
            "[REDACTED] oldsecret [REDACTED]"
        );
    }

    #[test]
    fn handle_is_shared_between_writer_and_mutator() {
        let mut handle = RedactorHandle::new(Box::new(Vec::new()), Vec::<String>::new());
        let mutator = handle.clone();
        mutator.add_secret("shared-secret").unwrap();
        handle.write_all(b"a shared-secret b").unwrap();
        handle.finish().unwrap();
        // The sink is boxed away; absence of a panic plus the add/write
        // interleaving is what this exercises.
    }

    #[test]
    fn values_to_redact_matches_globs_and_literals() {
        let env = Environment::from_pairs([
            ("DATABASE_PASSWORD", "hunter2hunter2"),
            ("MY_TOKEN", "tok-abc123"),
            ("PLAIN", "visible"),
            ("EMPTY_SECRET", ""),
        ]);
        let patterns = vec!["*_PASSWORD".to_string(), "MY_TOKEN".to_string()];
        let mut values = values_to_redact(&patterns, &env);
        values.sort();
        assert_eq!(values, vec!["hunter2hunter2", "tok-abc123"]);
    }
}
