//! Tracked objects (spec §3, design note §9): the capability interface used
//! to fingerprint a task's inputs and outputs for change detection.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::task::Task;

/// One comparable atom in a tracked object's fingerprint. `compare()` returns
/// a sequence of these rather than a single hash, so a backend can present a
/// diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareToken {
    /// Nanoseconds since the Unix epoch.
    Mtime(u128),
    Size(u64),
    Checksum(String),
    Literal(String),
    Missing,
}

/// The capability set every tracked-object kind implements.
pub trait TrackedObject: fmt::Debug + Send + Sync {
    fn key(&self) -> &str;
    fn compare(&self) -> Vec<CompareToken>;
    fn exists(&self) -> bool;
    /// True means "an error if this is not produced by some task and does
    /// not already exist."
    fn must_preexist(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct TrackedFile {
    path: PathBuf,
}

impl TrackedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrackedObject for TrackedFile {
    fn key(&self) -> &str {
        self.path.to_str().unwrap_or_default()
    }

    fn compare(&self) -> Vec<CompareToken> {
        match fs::metadata(&self.path) {
            Ok(meta) => vec![
                CompareToken::Size(meta.len()),
                CompareToken::Mtime(
                    meta.modified().unwrap_or(UNIX_EPOCH).duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos(),
                ),
            ],
            Err(_) => vec![CompareToken::Missing],
        }
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[derive(Debug, Clone)]
pub struct TrackedDirectory {
    path: PathBuf,
}

impl TrackedDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TrackedObject for TrackedDirectory {
    fn key(&self) -> &str {
        self.path.to_str().unwrap_or_default()
    }

    fn compare(&self) -> Vec<CompareToken> {
        match fs::read_dir(&self.path) {
            Ok(entries) => vec![CompareToken::Size(entries.count() as u64)],
            Err(_) => vec![CompareToken::Missing],
        }
    }

    fn exists(&self) -> bool {
        self.path.is_dir()
    }
}

#[derive(Debug, Clone)]
pub struct TrackedExecutable {
    path: PathBuf,
}

impl TrackedExecutable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrackedObject for TrackedExecutable {
    fn key(&self) -> &str {
        self.path.to_str().unwrap_or_default()
    }

    fn compare(&self) -> Vec<CompareToken> {
        let Ok(bytes) = fs::read(&self.path) else {
            return vec![CompareToken::Missing];
        };
        let digest = Sha256::digest(&bytes);
        vec![CompareToken::Size(bytes.len() as u64), CompareToken::Checksum(hex(&digest))]
    }

    fn exists(&self) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::metadata(&self.path).map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0).unwrap_or(false)
        }
        #[cfg(not(unix))]
        {
            self.path.is_file()
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A literal value dependency (e.g. a command string): tracked by equality,
/// not by filesystem state, so editing it invalidates dependents.
#[derive(Debug, Clone)]
pub struct TrackedVariable {
    key: String,
    value: String,
}

impl TrackedVariable {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

impl TrackedObject for TrackedVariable {
    fn key(&self) -> &str {
        &self.key
    }

    fn compare(&self) -> Vec<CompareToken> {
        vec![CompareToken::Literal(self.value.clone())]
    }

    fn exists(&self) -> bool {
        true
    }

    fn must_preexist(&self) -> bool {
        false
    }
}

/// A tracked object, tagged by variant (mirrors dagrs's tagged `Output`/
/// `Content` style). `TaskAlias` refers to an upstream task directly rather
/// than through a fingerprinted key; it resolves to a DAG edge and is never
/// compared.
#[derive(Debug, Clone)]
pub enum Tracked {
    File(Arc<TrackedFile>),
    Directory(Arc<TrackedDirectory>),
    Executable(Arc<TrackedExecutable>),
    Variable(Arc<TrackedVariable>),
    TaskAlias(Arc<Task>),
    Dynamic(Arc<dyn TrackedObject>),
}

impl Tracked {
    pub fn key(&self) -> String {
        match self {
            Tracked::File(f) => f.key().to_string(),
            Tracked::Directory(d) => d.key().to_string(),
            Tracked::Executable(e) => e.key().to_string(),
            Tracked::Variable(v) => v.key().to_string(),
            Tracked::TaskAlias(t) => format!("task:{}", t.task_no),
            Tracked::Dynamic(d) => d.key().to_string(),
        }
    }

    pub fn compare(&self) -> Vec<CompareToken> {
        match self {
            Tracked::File(f) => f.compare(),
            Tracked::Directory(d) => d.compare(),
            Tracked::Executable(e) => e.compare(),
            Tracked::Variable(v) => v.compare(),
            Tracked::TaskAlias(_) => Vec::new(),
            Tracked::Dynamic(d) => d.compare(),
        }
    }

    pub fn exists(&self) -> bool {
        match self {
            Tracked::File(f) => f.exists(),
            Tracked::Directory(d) => d.exists(),
            Tracked::Executable(e) => e.exists(),
            Tracked::Variable(v) => v.exists(),
            Tracked::TaskAlias(_) => true,
            Tracked::Dynamic(d) => d.exists(),
        }
    }

    pub fn must_preexist(&self) -> bool {
        match self {
            Tracked::File(f) => f.must_preexist(),
            Tracked::Directory(d) => d.must_preexist(),
            Tracked::Executable(e) => e.must_preexist(),
            Tracked::Variable(v) => v.must_preexist(),
            Tracked::TaskAlias(_) => false,
            Tracked::Dynamic(d) => d.must_preexist(),
        }
    }

    pub fn is_task_alias(&self) -> bool {
        matches!(self, Tracked::TaskAlias(_))
    }

    pub fn task_no(&self) -> Option<u64> {
        if let Tracked::TaskAlias(t) = self {
            Some(t.task_no)
        } else {
            None
        }
    }
}

impl From<&str> for Tracked {
    fn from(s: &str) -> Self {
        Tracked::File(Arc::new(TrackedFile::new(s)))
    }
}

impl From<String> for Tracked {
    fn from(s: String) -> Self {
        Tracked::File(Arc::new(TrackedFile::new(s)))
    }
}

impl From<Arc<Task>> for Tracked {
    fn from(t: Arc<Task>) -> Self {
        Tracked::TaskAlias(t)
    }
}

pub fn file(path: impl Into<PathBuf>) -> Tracked {
    Tracked::File(Arc::new(TrackedFile::new(path)))
}

pub fn directory(path: impl Into<PathBuf>) -> Tracked {
    Tracked::Directory(Arc::new(TrackedDirectory::new(path)))
}

pub fn executable(path: impl Into<PathBuf>) -> Tracked {
    Tracked::Executable(Arc::new(TrackedExecutable::new(path)))
}

pub fn variable(key: impl Into<String>, value: impl Into<String>) -> Tracked {
    Tracked::Variable(Arc::new(TrackedVariable::new(key, value)))
}

pub fn task_alias(task: &Arc<Task>) -> Tracked {
    Tracked::TaskAlias(task.clone())
}

/// Maps a tracked-object key to the task that produces it (`None` for a
/// pre-existing marker with no producing task).
#[derive(Default)]
pub struct DependencyIndex {
    producers: std::collections::HashMap<String, Option<Arc<Task>>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Option<Arc<Task>>> {
        self.producers.get(key).cloned()
    }

    pub fn link(&mut self, key: String, producer: Option<Arc<Task>>) {
        self.producers.insert(key, producer);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.producers.keys().map(|s| s.as_str())
    }
}
