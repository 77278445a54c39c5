//! Privileged filesystem primitives behind the gadget control surface
//!
//! Everything the controller and allocator do reduces to a handful of
//! filesystem operations on kernel attribute trees. [`ControlSurface`]
//! abstracts those so the control-plane logic is identical whether the
//! process is already root ([`FsSurface`]) or has to route every primitive
//! through `su` ([`ShellSurface`]).

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::{AppError, Result};
use crate::root::{quote, RootRunner};

/// Filesystem primitives executed with privilege
pub trait ControlSurface: Send + Sync {
    /// Read an attribute file, trimmed
    fn read_attr(&self, path: &Path) -> Result<String>;

    /// Write an attribute file in a single write
    fn write_attr(&self, path: &Path, value: &str) -> Result<()>;

    /// Create a directory (and missing parents)
    fn create_dir(&self, path: &Path) -> Result<()>;

    /// Remove a directory node; absent directories are not an error
    fn remove_dir(&self, path: &Path) -> Result<()>;

    /// Remove a file or symlink; absent paths are not an error
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Create a symlink at `dest` pointing to `src`
    fn symlink(&self, src: &Path, dest: &Path) -> Result<()>;

    /// Check whether a path exists
    fn exists(&self, path: &Path) -> bool;

    /// List the entry names of a directory, sorted
    fn list_dir(&self, path: &Path) -> Result<Vec<String>>;

    /// Create (or resize) a sparse file of exactly `len` bytes
    fn allocate_file(&self, path: &Path, len: u64) -> Result<()>;

    /// True iff this surface can actually perform privileged operations
    fn probe(&self) -> bool;
}

/// Direct `std::fs` surface
///
/// For processes already running as root, and for tests pointing the gadget
/// paths at a temp directory.
pub struct FsSurface {
    root: std::path::PathBuf,
}

impl FsSurface {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ControlSurface for FsSurface {
    fn read_attr(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|e| AppError::Internal(format!("Failed to read {}: {}", path.display(), e)))
    }

    /// Sysfs attributes require a single atomic write() syscall: the kernel
    /// processes the value on the first write, so the complete buffer
    /// (including the trailing newline) is built before writing.
    fn write_attr(&self, path: &Path, value: &str) -> Result<()> {
        // O_TRUNC may fail on special files, so plain O_WRONLY with a
        // create fallback for regular files
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .or_else(|e| {
                if path.exists() {
                    Err(e)
                } else {
                    File::create(path)
                }
            })
            .map_err(|e| AppError::Internal(format!("Failed to open {}: {}", path.display(), e)))?;

        let data: std::borrow::Cow<[u8]> = if value.ends_with('\n') {
            value.as_bytes().into()
        } else {
            let mut buf = value.as_bytes().to_vec();
            buf.push(b'\n');
            buf.into()
        };

        file.write_all(&data)
            .map_err(|e| AppError::Internal(format!("Failed to write {}: {}", path.display(), e)))?;
        file.flush()
            .map_err(|e| AppError::Internal(format!("Failed to flush {}: {}", path.display(), e)))
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| {
            AppError::Internal(format!(
                "Failed to create directory {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        if fs::remove_dir(path).is_ok() {
            return Ok(());
        }
        // ConfigFS drops attribute files implicitly on rmdir; a plain-fs
        // mirror keeps them around, so clear regular files and retry.
        for entry in fs::read_dir(path)
            .map_err(|e| AppError::Internal(format!("Failed to read {}: {}", path.display(), e)))?
        {
            let entry = entry
                .map_err(|e| AppError::Internal(format!("Failed to read directory entry: {}", e)))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                fs::remove_file(entry.path()).map_err(|e| {
                    AppError::Internal(format!(
                        "Failed to remove file {}: {}",
                        entry.path().display(),
                        e
                    ))
                })?;
            }
        }
        fs::remove_dir(path).map_err(|e| {
            AppError::Internal(format!(
                "Failed to remove directory {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path).map_err(|e| {
                AppError::Internal(format!("Failed to remove file {}: {}", path.display(), e))
            })?;
        }
        Ok(())
    }

    fn symlink(&self, src: &Path, dest: &Path) -> Result<()> {
        std::os::unix::fs::symlink(src, dest).map_err(|e| {
            AppError::Internal(format!(
                "Failed to create symlink {} -> {}: {}",
                dest.display(),
                src.display(),
                e
            ))
        })
    }

    fn exists(&self, path: &Path) -> bool {
        // symlink_metadata so dangling function links still count
        path.exists() || fs::symlink_metadata(path).is_ok()
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(path)
            .map_err(|e| AppError::Internal(format!("Failed to read {}: {}", path.display(), e)))?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn allocate_file(&self, path: &Path, len: u64) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| AppError::Internal(format!("Failed to create {}: {}", path.display(), e)))?;
        file.set_len(len)
            .map_err(|e| AppError::Internal(format!("Failed to resize {}: {}", path.display(), e)))
    }

    fn probe(&self) -> bool {
        if nix::unistd::geteuid().is_root() {
            return true;
        }
        // Non-root is still privileged enough when the whole tree is
        // redirected somewhere writable (tests, container mirrors)
        nix::unistd::access(&self.root, nix::unistd::AccessFlags::W_OK).is_ok()
    }
}

/// Shell surface routing every primitive through a [`RootRunner`]
///
/// This is the production path on a rooted device where the app process is
/// unprivileged: each primitive becomes one `su -c` invocation of a standard
/// tool with individually quoted arguments.
pub struct ShellSurface<R> {
    runner: R,
}

impl<R: RootRunner> ShellSurface<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl<R: RootRunner> ControlSurface for ShellSurface<R> {
    fn read_attr(&self, path: &Path) -> Result<String> {
        self.runner.run("cat", &[&path_arg(path)])
    }

    fn write_attr(&self, path: &Path, value: &str) -> Result<()> {
        // The redirection target must be opened by the privileged shell, so
        // the whole statement is one pre-quoted sh script
        let script = format!(
            "printf '%s\\n' {} > {}",
            quote(value),
            quote(&path_arg(path))
        );
        self.runner.run("sh", &["-c", &script]).map(|_| ())
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        self.runner.run("mkdir", &["-p", &path_arg(path)]).map(|_| ())
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        if !self.exists(path) {
            return Ok(());
        }
        self.runner.run("rmdir", &[&path_arg(path)]).map(|_| ())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.runner.run("rm", &["-f", &path_arg(path)]).map(|_| ())
    }

    fn symlink(&self, src: &Path, dest: &Path) -> Result<()> {
        self.runner
            .run("ln", &["-s", &path_arg(src), &path_arg(dest)])
            .map(|_| ())
    }

    fn exists(&self, path: &Path) -> bool {
        self.runner.run("test", &["-e", &path_arg(path)]).is_ok()
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let out = self.runner.run("ls", &["-1", &path_arg(path)])?;
        let mut names: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    fn allocate_file(&self, path: &Path, len: u64) -> Result<()> {
        self.runner
            .run("truncate", &["-s", &len.to_string(), &path_arg(path)])
            .map(|_| ())
    }

    fn probe(&self) -> bool {
        let ok = self.runner.probe();
        debug!("privilege probe: {}", ok);
        ok
    }
}
