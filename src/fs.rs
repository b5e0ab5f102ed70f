//! A small read-only filesystem interface, implemented directly over RomFS
//! tables and the SD tree. Paths use `/` separators; the empty string and
//! `/` both name the root.

use crate::error::CtrioResult;
use crate::io::RandomAccess;

/// What a path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub is_dir: bool,
}

impl FileInfo {
    pub fn is_file(&self) -> bool {
        !self.is_dir
    }
}

pub trait ReadOnlyFs {
    /// Names of the entries directly inside `path` (directories first is not
    /// guaranteed; order is the container's).
    fn listdir(&self, path: &str) -> CtrioResult<Vec<String>>;

    fn getinfo(&self, path: &str) -> CtrioResult<FileInfo>;

    /// Opens a file as an independent seekable stream.
    fn open(&self, path: &str) -> CtrioResult<Box<dyn RandomAccess>>;

    fn exists(&self, path: &str) -> bool {
        self.getinfo(path).is_ok()
    }

    /// Like [`ReadOnlyFs::listdir`], but pairing each name with its info.
    /// Containers with cheaper bulk metadata access may override this.
    fn scandir(&self, path: &str) -> CtrioResult<Vec<(String, FileInfo)>> {
        let dir = normalize(path);
        let mut out = Vec::new();
        for name in self.listdir(&dir)? {
            let info = self.getinfo(&join(&dir, &name))?;
            out.push((name, info));
        }
        Ok(out)
    }

    /// Depth-first walk from `path`, yielding `(dir, subdirs, files)`
    /// triples like a recursive directory scan.
    fn walk(&self, path: &str) -> CtrioResult<Vec<(String, Vec<String>, Vec<String>)>> {
        let mut out = Vec::new();
        let mut stack = vec![normalize(path)];
        while let Some(dir) = stack.pop() {
            let mut subdirs = Vec::new();
            let mut files = Vec::new();
            for (name, info) in self.scandir(&dir)? {
                if info.is_dir {
                    stack.push(join(&dir, &name));
                    subdirs.push(name);
                } else {
                    files.push(name);
                }
            }
            out.push((dir, subdirs, files));
        }
        Ok(out)
    }
}

/// Strips redundant slashes; the canonical root is the empty string.
pub(crate) fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
