//! Console output: `console.*` and `env.log`.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::HostCallResult;
use crate::function::{Args, FunctionKind, HostFunctionTable, host_functions};
use covenant_abi::AbiValue;

/// Tracing target for guest console output.
pub const GUEST_TARGET: &str = "covenant::guest";

/// Which stream a guest wrote to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Sink for guest console output.
pub trait Console: Send + Sync {
    /// Write `text`, followed by a newline when `newline` is set.
    fn write(&self, stream: ConsoleStream, text: &str, newline: bool) -> HostCallResult<()>;
}

/// Emits guest output as tracing events on [`GUEST_TARGET`].
///
/// Standard output is logged at `info`, standard error at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingConsole;

impl Console for TracingConsole {
    fn write(&self, stream: ConsoleStream, text: &str, _newline: bool) -> HostCallResult<()> {
        match stream {
            ConsoleStream::Stdout => info!(target: GUEST_TARGET, "{}", text),
            ConsoleStream::Stderr => warn!(target: GUEST_TARGET, "{}", text),
        }
        Ok(())
    }
}

/// Writes guest output straight to the process's stdout and stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioConsole;

impl Console for StdioConsole {
    fn write(&self, stream: ConsoleStream, text: &str, newline: bool) -> HostCallResult<()> {
        let end = if newline { "\n" } else { "" };
        match stream {
            ConsoleStream::Stdout => {
                let mut out = std::io::stdout().lock();
                write!(out, "{text}{end}")?;
                out.flush()?;
            }
            ConsoleStream::Stderr => {
                let mut err = std::io::stderr().lock();
                write!(err, "{text}{end}")?;
            }
        }
        Ok(())
    }
}

/// Captures guest output in memory.
#[derive(Debug, Default)]
pub struct BufferedConsole {
    stdout: Mutex<String>,
    stderr: Mutex<String>,
}

impl BufferedConsole {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written to `stream` so far.
    pub fn contents(&self, stream: ConsoleStream) -> String {
        match stream {
            ConsoleStream::Stdout => self.stdout.lock().clone(),
            ConsoleStream::Stderr => self.stderr.lock().clone(),
        }
    }

    /// Standard output split into lines.
    pub fn lines(&self) -> Vec<String> {
        self.stdout.lock().lines().map(String::from).collect()
    }

    /// Discard captured output.
    pub fn clear(&self) {
        self.stdout.lock().clear();
        self.stderr.lock().clear();
    }
}

impl Console for BufferedConsole {
    fn write(&self, stream: ConsoleStream, text: &str, newline: bool) -> HostCallResult<()> {
        let mut buf = match stream {
            ConsoleStream::Stdout => self.stdout.lock(),
            ConsoleStream::Stderr => self.stderr.lock(),
        };
        buf.push_str(text);
        if newline {
            buf.push('\n');
        }
        Ok(())
    }
}

pub(crate) fn register(table: &mut HostFunctionTable, console: Arc<dyn Console>) {
    let entries = [
        ("console.println", ConsoleStream::Stdout, true),
        ("console.print", ConsoleStream::Stdout, false),
        ("console.eprintln", ConsoleStream::Stderr, true),
        ("console.eprint", ConsoleStream::Stderr, false),
    ];

    for (id, stream, newline) in entries {
        let console = Arc::clone(&console);
        table.insert(crate::HostFunction::new(
            id,
            covenant_abi::Signature::new([covenant_abi::AbiType::Str], covenant_abi::AbiType::Unit),
            FunctionKind::Effect,
            move |values| {
                console.write(stream, Args::new(values).str(0)?, newline)?;
                Ok(AbiValue::Unit)
            },
        ));
    }

    host_functions!(table, FunctionKind::Effect, "env", {
        "log" => (Str) -> Unit, move |a: Args<'_>| {
            console.write(ConsoleStream::Stdout, a.str(0)?, true)?;
            Ok(AbiValue::Unit)
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_capability::ImportId;

    #[test]
    fn test_buffered_console_captures_streams() {
        let console = Arc::new(BufferedConsole::new());
        let mut table = HostFunctionTable::new();
        register(&mut table, console.clone());

        let call = |id: &'static str, text: &str| {
            table
                .get(&ImportId::new(id))
                .unwrap()
                .call(&[AbiValue::from(text)])
                .unwrap();
        };

        call("console.print", "a");
        call("console.println", "b");
        call("console.eprintln", "oops");
        call("env.log", "logged");

        assert_eq!(console.contents(ConsoleStream::Stdout), "ab\nlogged\n");
        assert_eq!(console.contents(ConsoleStream::Stderr), "oops\n");
        assert_eq!(console.lines(), vec!["ab", "logged"]);
    }
}
