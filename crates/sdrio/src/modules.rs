//! Runtime module loading.
//!
//! Module paths are scanned recursively and every file found is loaded as a
//! shared library. List paths name files (or directories of files) holding
//! one module path per line. A module that fails to load is logged and
//! recorded; the scan always runs to the end.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use sdrio_core::config::ModulesConfig;

/// Loads one module into the process.
pub trait ModuleLoader {
    fn load(&self, path: &Path) -> Result<()>;
}

/// `dlopen(RTLD_LAZY)`. Handles are never closed; modules stay loaded for
/// the life of the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct DlopenLoader;

#[cfg(unix)]
impl ModuleLoader for DlopenLoader {
    fn load(&self, path: &Path) -> Result<()> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .with_context(|| format!("module path {} contains a NUL byte", path.display()))?;
        // SAFETY: `c_path` is a valid NUL-terminated string for the duration
        // of the call. The returned handle is intentionally leaked.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY) };
        if handle.is_null() {
            anyhow::bail!("dlopen failed to load \"{}\": {}", path.display(), dlerror());
        }
        Ok(())
    }
}

#[cfg(unix)]
fn dlerror() -> String {
    // SAFETY: dlerror returns either null or a NUL-terminated string owned
    // by the loader, valid until the next dl* call on this thread.
    unsafe {
        let msg = libc::dlerror();
        if msg.is_null() {
            "unknown error".to_string()
        } else {
            std::ffi::CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    }
}

#[cfg(not(unix))]
impl ModuleLoader for DlopenLoader {
    fn load(&self, path: &Path) -> Result<()> {
        anyhow::bail!("module loading not supported: cannot load \"{}\"", path.display())
    }
}

/// Outcome of one scan.
#[derive(Debug, Default)]
pub struct ModuleReport {
    pub loaded: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, anyhow::Error)>,
}

impl ModuleReport {
    fn attempt(&mut self, loader: &dyn ModuleLoader, path: &Path) {
        match loader.load(path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "module loaded");
                self.loaded.push(path.to_path_buf());
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "module failed to load");
                self.failed.push((path.to_path_buf(), e));
            }
        }
    }
}

/// Scan `paths` and `list_paths` and load everything found.
pub fn load_modules(
    loader: &dyn ModuleLoader,
    paths: &[PathBuf],
    list_paths: &[PathBuf],
) -> ModuleReport {
    let mut report = ModuleReport::default();
    for path in paths {
        load_module_path(loader, path, &mut report);
    }
    for path in list_paths {
        for list in list_files(path) {
            if let Err(e) = load_module_list(loader, &list, &mut report) {
                tracing::warn!(path = %list.display(), error = %e, "unreadable module list");
                report.failed.push((list, e));
            }
        }
    }
    report
}

fn load_module_path(loader: &dyn ModuleLoader, path: &Path, report: &mut ModuleReport) {
    if !path.exists() {
        return;
    }
    if path.is_dir() {
        for entry in sorted_entries(path) {
            load_module_path(loader, &entry, report);
        }
        return;
    }
    report.attempt(loader, path);
}

/// A list path is either one list file or a directory of list files.
fn list_files(path: &Path) -> Vec<PathBuf> {
    if path.is_dir() {
        sorted_entries(path)
            .into_iter()
            .filter(|p| p.is_file())
            .collect()
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        Vec::new()
    }
}

fn load_module_list(loader: &dyn ModuleLoader, list: &Path, report: &mut ModuleReport) -> Result<()> {
    let text = fs::read_to_string(list).with_context(|| format!("reading {}", list.display()))?;
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        report.attempt(loader, Path::new(line));
    }
    Ok(())
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "cannot read module directory");
            Vec::new()
        }
    };
    entries.sort();
    entries
}

static INIT: OnceLock<ModuleReport> = OnceLock::new();

/// Load the configured modules once per process. Later calls return the
/// first call's report without scanning again.
pub fn init_modules(config: &ModulesConfig) -> &'static ModuleReport {
    INIT.get_or_init(|| {
        let report = load_modules(&DlopenLoader, &config.paths, &config.list_paths);
        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "modules initialized"
        );
        report
    })
}
