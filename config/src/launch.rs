use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use childproc_process::Environment;
use childproc_process::Initializer;
use childproc_process::Pid;
use childproc_process::Process;
use childproc_process::ProcessGroup;
use childproc_process::StartDir;
use childproc_process::StdioRedirect;
use childproc_process::stdio::Stdio;
use serde::Deserialize;
use tracing::debug;
use tracing::info;

use crate::error::ConfigError;
use crate::error::Result;
use crate::error::parse;
use crate::error::read;

const INLINE_SOURCE: &str = "<inline>";

/// Where a standard stream of the child goes: `"inherit"`, `"null"` or a
/// file path.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(from = "String")]
pub enum StdioConfig {
    #[default]
    Inherit,
    Null,
    Path(PathBuf),
}

impl From<String> for StdioConfig {
    fn from(value: String) -> Self {
        match value.as_str() {
            "inherit" => StdioConfig::Inherit,
            "null" => StdioConfig::Null,
            _ => StdioConfig::Path(PathBuf::from(value)),
        }
    }
}

impl StdioConfig {
    fn to_stdio(&self) -> Stdio {
        match self {
            StdioConfig::Inherit => Stdio::Inherit,
            StdioConfig::Null => Stdio::Null,
            StdioConfig::Path(path) => Stdio::path(path),
        }
    }

    fn rebase(&mut self, base: &Path) {
        if let StdioConfig::Path(path) = self
            && path.is_relative()
        {
            *path = base.join(&*path);
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LaunchConfig {
    /// Executable path, or a bare name looked up on `PATH`.
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Variables set on top of (or instead of) the parent environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_inherit_env")]
    pub inherit_env: bool,
    #[serde(default)]
    pub stdin: StdioConfig,
    #[serde(default)]
    pub stdout: StdioConfig,
    #[serde(default)]
    pub stderr: StdioConfig,
}

fn default_inherit_env() -> bool {
    true
}

/// Initializers built from a [`LaunchConfig`], kept alive for one launch.
struct Prepared {
    redirect: StdioRedirect,
    env: Option<Environment>,
    start_dir: Option<StartDir>,
}

impl Prepared {
    fn initializers(&mut self) -> Vec<&mut dyn Initializer> {
        let mut initializers: Vec<&mut dyn Initializer> = vec![&mut self.redirect];
        if let Some(env) = self.env.as_mut() {
            initializers.push(env);
        }
        if let Some(start_dir) = self.start_dir.as_mut() {
            initializers.push(start_dir);
        }
        initializers
    }
}

impl LaunchConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            inherit_env: default_inherit_env(),
            stdin: StdioConfig::Inherit,
            stdout: StdioConfig::Inherit,
            stderr: StdioConfig::Inherit,
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        parse(Path::new(INLINE_SOURCE), contents)
    }

    /// Read and parse `path`, resolving relative paths against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = read(path)?;
        let mut config: Self = parse(path, &contents)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    pub fn launch(&self) -> Result<Process> {
        let (exe, mut prepared) = self.prepare()?;
        let process = Process::launch(&exe, &self.args, &mut prepared.initializers())?;
        info!(pid = process.id(), program = %exe.display(), "launched process");
        Ok(process)
    }

    pub fn emplace_into(&self, group: &mut ProcessGroup) -> Result<Pid> {
        let (exe, mut prepared) = self.prepare()?;
        let pid = group.emplace(&exe, &self.args, &mut prepared.initializers())?;
        info!(pid, program = %exe.display(), "launched group member");
        Ok(pid)
    }

    fn rebase(&mut self, base: &Path) {
        if let Some(cwd) = self.cwd.as_mut()
            && cwd.is_relative()
        {
            *cwd = base.join(&*cwd);
        }
        let program = Path::new(&self.program);
        if program.is_relative() && program.components().count() > 1 {
            self.program = base.join(program).to_string_lossy().into_owned();
        }
        self.stdin.rebase(base);
        self.stdout.rebase(base);
        self.stderr.rebase(base);
    }

    fn environment(&self) -> Environment {
        let mut env = if self.inherit_env {
            Environment::inherit()
        } else {
            Environment::empty()
        };
        for (name, value) in &self.env {
            env.set(name, value);
        }
        env
    }

    /// Resolve the executable and build the initializers for one launch.
    fn prepare(&self) -> Result<(PathBuf, Prepared)> {
        let env = self.environment();
        let program = Path::new(&self.program);
        let exe = if program.components().count() > 1 || program.is_absolute() {
            program.to_path_buf()
        } else {
            env.find_executable(program)
                .ok_or_else(|| ConfigError::ProgramNotFound(self.program.clone()))?
        };
        debug!(program = %self.program, exe = %exe.display(), "resolved program");

        let redirect = StdioRedirect::new()
            .stdin(self.stdin.to_stdio())
            .stdout(self.stdout.to_stdio())
            .stderr(self.stderr.to_stdio());
        let env = (!self.inherit_env || !self.env.is_empty()).then_some(env);
        let prepared = Prepared {
            redirect,
            env,
            start_dir: self.cwd.as_ref().map(StartDir::new),
        };
        Ok((exe, prepared))
    }
}

/// A set of processes launched into one [`ProcessGroup`], described as
/// `[[processes]]` tables.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    #[serde(default)]
    pub processes: Vec<LaunchConfig>,
}

impl GroupConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        parse(Path::new(INLINE_SOURCE), contents)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = read(path)?;
        let mut config: Self = parse(path, &contents)?;
        if let Some(base) = path.parent() {
            for process in &mut config.processes {
                process.rebase(base);
            }
        }
        Ok(config)
    }

    /// Launch every process into a new group. If one fails, the members
    /// launched so far are killed along with the group.
    pub fn spawn(&self) -> Result<ProcessGroup> {
        let mut group = ProcessGroup::new()?;
        for process in &self.processes {
            process.emplace_into(&mut group)?;
        }
        Ok(group)
    }
}
