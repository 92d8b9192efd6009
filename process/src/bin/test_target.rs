//! Small, predictable child used by the integration tests.
//!
//! Actions run in the order the flags are listed below, then the process exits
//! with `--exit-code`.

use std::io::BufRead;
use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use childproc_process::Process;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "childproc-test-target")]
struct Cli {
    /// Write this text and a newline to stdout.
    #[arg(long)]
    out: Option<String>,

    /// Write this text and a newline to stderr.
    #[arg(long)]
    err: Option<String>,

    /// Copy one line from stdin to stdout.
    #[arg(long = "in")]
    echo_stdin: bool,

    /// Print the value of this environment variable, or nothing if unset.
    #[arg(long)]
    env: Option<String>,

    /// Print the working directory.
    #[arg(long)]
    cwd: bool,

    /// Launch a copy of this binary sleeping for the given milliseconds,
    /// print its pid and leave it running.
    #[arg(long, value_name = "MS")]
    spawn_wait: Option<u64>,

    /// Sleep for the given milliseconds.
    #[arg(long, value_name = "MS")]
    wait: Option<u64>,

    /// Raise this signal (POSIX only).
    #[arg(long)]
    signal: Option<i32>,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    exit_code: i32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    debug!(?cli, "test target started");

    let mut stdout = std::io::stdout().lock();
    if let Some(text) = &cli.out {
        writeln!(stdout, "{text}")?;
    }
    if let Some(text) = &cli.err {
        eprintln!("{text}");
    }
    if cli.echo_stdin {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        write!(stdout, "{line}")?;
    }
    if let Some(name) = &cli.env
        && let Some(value) = std::env::var_os(name)
    {
        writeln!(stdout, "{}", value.to_string_lossy())?;
    }
    if cli.cwd {
        let cwd = std::env::current_dir()?;
        writeln!(stdout, "{}", cwd.display())?;
    }
    if let Some(ms) = cli.spawn_wait {
        let exe = std::env::current_exe()?;
        let mut child = Process::launch(&exe, ["--wait".to_string(), ms.to_string()], &mut [])
            .context("failed to launch grandchild")?;
        child.detach();
        writeln!(stdout, "{}", child.id())?;
    }
    stdout.flush()?;

    if let Some(ms) = cli.wait {
        std::thread::sleep(Duration::from_millis(ms));
    }
    if let Some(signal) = cli.signal {
        raise(signal)?;
    }
    std::process::exit(cli.exit_code);
}

#[cfg(unix)]
fn raise(signal: i32) -> anyhow::Result<()> {
    if unsafe { libc::raise(signal) } != 0 {
        return Err(std::io::Error::last_os_error()).context("raise failed");
    }
    // A caught or ignored signal falls through to the exit code.
    Ok(())
}

#[cfg(not(unix))]
fn raise(signal: i32) -> anyhow::Result<()> {
    anyhow::bail!("--signal {signal} is not supported on this platform")
}
