//! Environment passed to a child.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

use crate::launcher::Initializer;
use crate::launcher::Launcher;

#[cfg(unix)]
const LIST_SEPARATOR: &str = ":";
#[cfg(windows)]
const LIST_SEPARATOR: &str = ";";

/// Resolve `name` against the current process's `PATH`.
pub fn find_executable(name: impl AsRef<OsStr>) -> Option<PathBuf> {
    which::which(name.as_ref()).ok()
}

/// An explicit environment, replacing the parent's when used as an
/// initializer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<OsString, OsString>,
}

impl Environment {
    /// Snapshot of the current process environment.
    pub fn inherit() -> Self {
        Self {
            vars: std::env::vars_os().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<OsString>, value: impl Into<OsString>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Set `name` to `values` joined with the platform list separator.
    pub fn set_list<I, S>(&mut self, name: impl Into<OsString>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut joined = OsString::new();
        for (index, value) in values.into_iter().enumerate() {
            if index > 0 {
                joined.push(LIST_SEPARATOR);
            }
            joined.push(value.as_ref());
        }
        self.set(name, joined)
    }

    pub fn remove(&mut self, name: impl AsRef<OsStr>) -> Option<OsString> {
        self.vars.remove(name.as_ref())
    }

    pub fn get(&self, name: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(name.as_ref()).map(OsString::as_os_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars
            .iter()
            .map(|(name, value)| (name.as_os_str(), value.as_os_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Resolve `name` against this environment's `PATH`.
    pub fn find_executable(&self, name: impl AsRef<OsStr>) -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        which::which_in(name.as_ref(), self.get("PATH"), cwd).ok()
    }

    fn validate(&self) -> io::Result<()> {
        for (name, value) in self.iter() {
            let name_bytes = name.as_encoded_bytes();
            // Windows keeps per-drive directories in variables like `=C:`.
            let checked = if cfg!(windows) {
                name_bytes.get(1..).unwrap_or_default()
            } else {
                name_bytes
            };
            if name_bytes.is_empty() || checked.contains(&b'=') || name_bytes.contains(&0) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid environment variable name {name:?}"),
                ));
            }
            if value.as_encoded_bytes().contains(&0) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("value of {name:?} contains a NUL byte"),
                ));
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn to_entries(&self) -> io::Result<Vec<std::ffi::CString>> {
        self.validate()?;
        self.iter()
            .map(|(name, value)| {
                let mut entry = name.as_encoded_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_encoded_bytes());
                std::ffi::CString::new(entry)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
            })
            .collect()
    }

    /// UTF-16 block sorted case-insensitively by name, as `CreateProcessW`
    /// expects.
    #[cfg(windows)]
    fn to_block(&self) -> io::Result<Vec<u16>> {
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Foundation::ERROR_BAD_ENVIRONMENT;

        self.validate()?;
        if self.is_empty() {
            return Err(io::Error::from_raw_os_error(ERROR_BAD_ENVIRONMENT as i32));
        }
        let mut entries: Vec<(String, &OsStr, &OsStr)> = self
            .iter()
            .map(|(name, value)| (name.to_string_lossy().to_uppercase(), name, value))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(b.1)));
        let mut block = Vec::new();
        for (_, name, value) in entries {
            block.extend(name.encode_wide());
            block.push(u16::from(b'='));
            block.extend(value.encode_wide());
            block.push(0);
        }
        block.push(0);
        Ok(block)
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<OsString>,
    V: Into<OsString>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl Initializer for Environment {
    #[cfg(unix)]
    fn on_setup(&mut self, launcher: &mut Launcher) {
        match self.to_entries() {
            Ok(entries) => launcher.set_env(entries),
            Err(err) => launcher.set_error(err, "invalid environment"),
        }
    }

    #[cfg(windows)]
    fn on_setup(&mut self, launcher: &mut Launcher) {
        match self.to_block() {
            Ok(block) => launcher.set_env_block(block),
            Err(err) => launcher.set_error(err, "invalid environment"),
        }
    }
}
