use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use tuitest::{Grid, HarnessConfig, Session, Settled, StdinSource};

/// Run a program on a virtual terminal and print what it left on screen.
#[derive(Parser, Debug)]
#[command(name = "tuitest", version, about)]
struct Cli {
    /// TOML file with session settings; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Terminal size as COLSxLINES
    #[arg(long, value_parser = parse_size)]
    size: Option<(u16, u16)>,

    /// Text delivered to the program at startup
    #[arg(long)]
    stdin: Option<String>,

    /// Deliver --stdin through a pipe instead of typing it
    #[arg(long)]
    stdin_pipe: bool,

    /// Capture stdout separately from the screen
    #[arg(long)]
    capture_stdout: bool,

    /// Capture stderr separately from the screen
    #[arg(long)]
    capture_stderr: bool,

    /// What to wait for before printing
    #[arg(long, value_enum, default_value_t = WaitMode::Stable)]
    wait: WaitMode,

    /// Wait budget in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print a JSON report including the full grid
    #[arg(long)]
    json: bool,

    /// Program and arguments
    #[arg(last = true)]
    command: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum WaitMode {
    /// Until output has been quiet for the quiescence window
    Stable,
    /// Until the program exits
    Finished,
}

#[derive(Serialize)]
struct Report {
    pid: u32,
    status: Option<i32>,
    screen: String,
    cursor: (u16, u16),
    stdout: Option<String>,
    stderr: Option<String>,
    grid: Grid,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TUITEST_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let mut session = Session::start(config).context("Failed to start session")?;
    let (stdout, stderr) = match cli.wait {
        WaitMode::Stable => {
            let quiescence = session.config().timing.quiescence_window();
            let settled = match cli.timeout_ms {
                Some(ms) => {
                    session.wait_for_stable_output_within(Duration::from_millis(ms), quiescence)
                }
                None => session.wait_for_stable_output(),
            }
            .context("Output never settled")?;
            if let Settled::Exited(state) = settled {
                tracing::debug!(status = ?state.status, "program exited before settling");
            }
            (None, None)
        }
        WaitMode::Finished => {
            let finished = match cli.timeout_ms {
                Some(ms) => session.wait_for_finished_within(Duration::from_millis(ms)),
                None => session.wait_for_finished(),
            }
            .context("Program did not finish")?;
            (finished.stdout, finished.stderr)
        }
    };

    let status = session.exit_state().status;
    if cli.json {
        let report = Report {
            pid: session.pid(),
            status,
            screen: session.screen_text(),
            cursor: session.cursor(),
            stdout,
            stderr,
            grid: session.snapshot(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", session.screen_text());
        if let Some(out) = stdout {
            println!("--- stdout ---\n{out}");
        }
        if let Some(err) = stderr {
            println!("--- stderr ---\n{err}");
        }
    }

    session.close();
    if let Some(code) = status.filter(|code| *code != 0) {
        std::process::exit(code);
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => HarnessConfig::default(),
    };

    if let Some((program, args)) = cli.command.split_first() {
        config.executable = PathBuf::from(program);
        config.args = args.to_vec();
    }
    if config.executable.as_os_str().is_empty() {
        bail!("No program given; pass one after `--` or set `executable` in the config");
    }

    if let Some((columns, lines)) = cli.size {
        config = config.size(columns, lines);
    }
    if let Some(text) = &cli.stdin {
        config = config.stdin(text.as_bytes());
    }
    if cli.stdin_pipe {
        config = config.stdin_source(StdinSource::Pipe);
    }
    config.capture_stdout |= cli.capture_stdout;
    config.capture_stderr |= cli.capture_stderr;

    config.validate()?;
    Ok(config)
}

fn parse_size(s: &str) -> Result<(u16, u16), String> {
    let (columns, lines) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected COLSxLINES, got `{s}`"))?;
    let columns = columns
        .parse::<u16>()
        .map_err(|e| format!("bad column count `{columns}`: {e}"))?;
    let lines = lines
        .parse::<u16>()
        .map_err(|e| format!("bad line count `{lines}`: {e}"))?;
    if columns == 0 || lines == 0 {
        return Err("terminal size must be non-zero".to_string());
    }
    Ok((columns, lines))
}
