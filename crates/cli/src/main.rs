//! Command-line driver: load a script (or inline chunk), run it, report
//! errors with their traceback. Exit code 0 on success, 1 on load or
//! execution failure.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sable_compiler::load_buffer;
use sable_core::limits::MULTRET;
use sable_vm::dump::dump_proto;
use sable_vm::{Runtime, Value};

#[derive(Parser, Debug)]
#[command(name = "sable", about = "The Sable language runtime")]
struct Cli {
    /// Script file to run.
    #[arg(value_name = "SCRIPT", conflicts_with = "eval")]
    script: Option<PathBuf>,

    /// Inline chunk to run instead of a file.
    #[arg(short = 'e', long = "eval", value_name = "CHUNK")]
    eval: Option<String>,

    /// Disassemble the compiled chunk before running it.
    #[arg(long)]
    dump_bytecode: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("sable: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let (source, chunk_name) = match (&cli.script, &cli.eval) {
        (_, Some(chunk)) => (chunk.clone(), "=eval".to_string()),
        (Some(path), None) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            (text, path.display().to_string())
        }
        (None, None) => anyhow::bail!("no script given (see --help)"),
    };

    let mut rt = Runtime::new();
    rt.open_libs();

    load_buffer(&mut rt, &source, &chunk_name).map_err(anyhow::Error::new)?;

    if cli.dump_bytecode {
        if let Value::Closure(closure) = rt.value_at(-1) {
            let proto = rt.heap().closure(closure).proto;
            print!("{}", dump_proto(rt.heap(), proto, 0));
        }
    }

    rt.call(0, MULTRET).map_err(anyhow::Error::new)?;

    tracing::debug!(
        objects = rt.heap().object_count(),
        bytes = rt.heap().total_bytes(),
        "chunk completed"
    );
    rt.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli_for(script: Option<PathBuf>, eval: Option<String>) -> Cli {
        Cli {
            script,
            eval,
            dump_bytecode: false,
        }
    }

    #[test]
    fn runs_an_inline_chunk() {
        let cli = cli_for(None, Some("let x = 40 + 2".to_string()));
        assert!(run(&cli).is_ok());
    }

    #[test]
    fn runs_a_script_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "function f(n) {{ return n * 2 }}").unwrap();
        writeln!(file, "f(21)").unwrap();
        let cli = cli_for(Some(file.path().to_path_buf()), None);
        assert!(run(&cli).is_ok());
    }

    #[test]
    fn load_failures_are_errors() {
        let cli = cli_for(None, Some("let = broken".to_string()));
        assert!(run(&cli).is_err());
    }

    #[test]
    fn runtime_failures_are_errors() {
        let cli = cli_for(None, Some("error(\"nope\")".to_string()));
        assert!(run(&cli).is_err());
    }

    #[test]
    fn missing_script_is_an_error() {
        let cli = cli_for(Some(PathBuf::from("/nonexistent/script.sbl")), None);
        assert!(run(&cli).is_err());
    }
}
