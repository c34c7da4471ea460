use motiflab::{
    about,
    client::Client,
    config::EngineConfig,
    data::{DataObject, Promptable},
    engine::Engine,
    engine_shell::{
        execute_shell_command, parse_shell_tokens, persist_config_changes, shell_help_text,
    },
    error::EngineError,
    notify::{LogLevel, MessageListener},
};
use anyhow::{Result, anyhow};
use serde::Serialize;
use std::{
    env,
    io::{self, BufRead, Write},
    panic::{AssertUnwindSafe, catch_unwind},
    path::Path,
    sync::Arc,
};

const DEFAULT_STATE_PATH: &str = ".motiflab_session.json";

fn usage() {
    eprintln!(
        "Usage:\n  \
  motiflab_cli --version\n  \
  motiflab_cli [--state PATH] [--config PATH] COMMAND [ARGS]\n\n\
{}\n\n  \
  Tip: pass @file.json instead of inline JSON",
        shell_help_text()
    );
}

fn setup_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Talks to the user on stdin/stderr. Everything printed to stdout is JSON.
struct ConsoleClient;

impl ConsoleClient {
    fn ask(&self, question: &str) -> Option<String> {
        eprint!("{question} ");
        io::stderr().flush().ok()?;
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

impl MessageListener for ConsoleClient {
    fn error_message(&self, message: &str, code: i32) {
        eprintln!("error [{code}]: {message}");
    }

    fn log_message(&self, message: &str, level: LogLevel) {
        if level >= LogLevel::Info {
            eprintln!("{message}");
        }
    }

    fn status_message(&self, message: &str) {
        tracing::info!("{message}");
    }
}

impl Client for ConsoleClient {
    fn prompt_value(&self, data: &DataObject) -> Option<String> {
        let question = format!("{} [{}]:", data.prompt_text(), data.current_value_text());
        self.ask(&question)
    }

    fn should_retry(&self, task_name: &str, error: &EngineError) -> bool {
        let question = format!("'{task_name}' failed: {error}. Retry? [y/N]");
        self.ask(&question)
            .is_some_and(|a| matches!(a.trim(), "y" | "Y" | "yes"))
    }

    fn handle_uncaught_exception(&self, message: &str) {
        eprintln!("internal error: {message}");
    }
}

struct GlobalArgs {
    state_path: String,
    config_path: Option<String>,
    cmd_idx: usize,
}

fn parse_global_args(args: &[String]) -> Result<GlobalArgs> {
    let mut ret = GlobalArgs {
        state_path: DEFAULT_STATE_PATH.to_string(),
        config_path: None,
        cmd_idx: 1,
    };
    while ret.cmd_idx < args.len() {
        match args[ret.cmd_idx].as_str() {
            "--state" => {
                ret.state_path = args
                    .get(ret.cmd_idx + 1)
                    .cloned()
                    .ok_or(anyhow!("Missing value after --state"))?;
            }
            "--config" => {
                ret.config_path = Some(
                    args.get(ret.cmd_idx + 1)
                        .cloned()
                        .ok_or(anyhow!("Missing value after --config"))?,
                );
            }
            _ => break,
        }
        ret.cmd_idx += 2;
    }
    Ok(ret)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow!("Could not serialize JSON output: {e}"))?;
    println!("{text}");
    Ok(())
}

fn main() {
    setup_tracing();
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", about::version_cli_text());
        return Ok(());
    }
    let globals = parse_global_args(&args)?;
    if args.len() <= globals.cmd_idx {
        usage();
        return Err(anyhow!("Missing command"));
    }

    let config = match &globals.config_path {
        Some(path) if Path::new(path).exists() => EngineConfig::load_from_path(path)?,
        Some(_) => EngineConfig::default(),
        None => EngineConfig::default(),
    };
    let engine = Engine::with_config(config);
    engine.set_client(Some(Arc::new(ConsoleClient)));

    if Path::new(&globals.state_path).exists() {
        engine
            .load_session_from_path(&globals.state_path)
            .map_err(|e| anyhow!("Could not load '{}': {e}", globals.state_path))?;
    }

    let command = parse_shell_tokens(&args[globals.cmd_idx..]).map_err(|e| anyhow!(e))?;
    tracing::debug!("{}", command.preview());
    let outcome = catch_unwind(AssertUnwindSafe(|| execute_shell_command(&engine, &command)));
    let result = match outcome {
        Ok(result) => result.map_err(|e| anyhow!(e))?,
        Err(_) => {
            let message = format!("'{}' failed unexpectedly", command.preview());
            engine.report_uncaught(&message);
            engine.shutdown();
            return Err(anyhow!(message));
        }
    };

    if command.is_config_mutating()
        && !persist_config_changes(&engine, &command, globals.config_path.as_deref())?
    {
        eprintln!("note: parameter changed for this run only; pass --config PATH to keep it");
    }
    if result.state_changed {
        engine.save_session_to_path(&globals.state_path)?;
    }
    engine.shutdown();
    print_json(&result.output)
}
