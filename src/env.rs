//! Ordered, case-aware environment map.
//!
//! The executor threads one environment through every phase of a job. It
//! must preserve insertion order when enumerated (hook wrappers export it
//! verbatim, and reproducible exports make debugging sane) and must match
//! the host's key-casing rules: Windows folds variable names, POSIX does
//! not. Hooks mutate the environment indirectly, so the map also supports
//! computing and applying diffs.

use std::collections::HashMap;
use std::fmt;

/// An environment variable map that remembers insertion order and follows
/// the host OS's key-casing rules.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    keys: Vec<String>,
    values: HashMap<String, String>,
    case_fold: bool,
}

/// The difference between two environments, insertion-ordered so that
/// applying or logging a diff is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvDiff {
    pub added: Vec<(String, String)>,
    pub changed: Vec<(String, String)>,
    pub removed: Vec<String>,
}

impl EnvDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Drop an entry by key, wherever it appears.
    pub fn discard(&mut self, key: &str) {
        self.added.retain(|(k, _)| k != key);
        self.changed.retain(|(k, _)| k != key);
        self.removed.retain(|k| k != key);
    }
}

impl Environment {
    /// An empty environment with the host's casing rules.
    pub fn new() -> Self {
        Self::with_case_fold(cfg!(windows))
    }

    /// An empty environment with explicit casing rules. Tests use this to
    /// exercise the Windows behavior on any host.
    pub fn with_case_fold(case_fold: bool) -> Self {
        Self {
            keys: Vec::new(),
            values: HashMap::new(),
            case_fold,
        }
    }

    /// Snapshot of the calling process's environment.
    pub fn from_process() -> Self {
        let mut env = Self::new();
        for (k, v) in std::env::vars() {
            env.set(&k, &v);
        }
        env
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut env = Self::new();
        for (k, v) in pairs {
            env.set(k.as_ref(), v.as_ref());
        }
        env
    }

    fn canon(&self, key: &str) -> String {
        if self.case_fold {
            key.to_uppercase()
        } else {
            key.to_string()
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&self.canon(key)).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&self.canon(key))
    }

    /// Insert or overwrite. A fresh key lands at the end of the iteration
    /// order; overwriting keeps the original position.
    pub fn set(&mut self, key: &str, value: &str) {
        let key = self.canon(key);
        if self.values.insert(key.clone(), value.to_string()).is_none() {
            self.keys.push(key);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let key = self.canon(key);
        let prev = self.values.remove(&key);
        if prev.is_some() {
            self.keys.retain(|k| *k != key);
        }
        prev
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate `(key, value)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keys
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.as_str(), v.as_str())))
    }

    /// Copy every entry of `other` into `self` (other wins on conflict).
    pub fn merge(&mut self, other: &Environment) {
        for (k, v) in other.iter() {
            self.set(k, v);
        }
    }

    /// The diff that turns `base` into `self`: keys present here but not in
    /// `base` are `added`, keys with differing values are `changed`, keys
    /// only in `base` are `removed`. Added/changed follow this map's
    /// insertion order, removed follows `base`'s.
    pub fn diff(&self, base: &Environment) -> EnvDiff {
        let mut diff = EnvDiff::default();
        for (k, v) in self.iter() {
            match base.get(k) {
                None => diff.added.push((k.to_string(), v.to_string())),
                Some(old) if old != v => diff.changed.push((k.to_string(), v.to_string())),
                Some(_) => {}
            }
        }
        for (k, _) in base.iter() {
            if !self.contains(k) {
                diff.removed.push(k.to_string());
            }
        }
        diff
    }

    /// Apply a diff in place: adds, then changes, then removals.
    pub fn apply(&mut self, diff: &EnvDiff) {
        for (k, v) in &diff.added {
            self.set(k, v);
        }
        for (k, v) in &diff.changed {
            self.set(k, v);
        }
        for k in &diff.removed {
            self.remove(k);
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in self.iter() {
            writeln!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}
