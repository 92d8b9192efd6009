use std::path::Path;
use std::path::PathBuf;

use crate::launcher::Initializer;
use crate::launcher::Launcher;

/// Initializer setting the child's working directory.
///
/// On POSIX the directory is entered in the child just before `execve`, so a
/// missing directory surfaces as an exec error.
#[derive(Debug, Clone)]
pub struct StartDir {
    path: PathBuf,
    #[cfg(unix)]
    c_path: Option<std::ffi::CString>,
}

impl StartDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            #[cfg(unix)]
            c_path: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
impl Initializer for StartDir {
    fn on_setup(&mut self, launcher: &mut Launcher) {
        use std::os::unix::ffi::OsStrExt;

        match std::ffi::CString::new(self.path.as_os_str().as_bytes()) {
            Ok(c_path) => self.c_path = Some(c_path),
            Err(err) => launcher.set_error(
                std::io::Error::new(std::io::ErrorKind::InvalidInput, err),
                "start directory contains a NUL byte",
            ),
        }
    }

    fn on_exec_setup(&mut self, launcher: &mut Launcher) {
        let Some(c_path) = &self.c_path else {
            return;
        };
        if unsafe { libc::chdir(c_path.as_ptr()) } == -1 {
            launcher.set_error(std::io::Error::last_os_error(), "chdir failed");
        }
    }
}

#[cfg(windows)]
impl Initializer for StartDir {
    fn on_setup(&mut self, launcher: &mut Launcher) {
        launcher.set_work_dir(&self.path);
    }
}
