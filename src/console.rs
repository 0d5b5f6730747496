use std::{
    io::{self, BufRead, IsTerminal, Write},
    sync::{Arc, Mutex, PoisonError},
};

use crate::{cancel::CancelToken, cli::error::ExoError};

type SharedReader = Arc<Mutex<Box<dyn BufRead + Send>>>;
type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// The standard streams a command talks to.
///
/// Commands never touch `std::io` directly so that the whole lifecycle can be
/// driven with captured output and scripted input.
#[derive(Clone)]
pub(crate) struct Console {
    stdin: SharedReader,
    stdout: SharedWriter,
    stderr: SharedWriter,
    interactive: bool,
    stderr_is_terminal: bool,
}

impl Console {
    pub(crate) fn stdio() -> Self {
        Self {
            stdin: Arc::new(Mutex::new(Box::new(io::BufReader::new(io::stdin())))),
            stdout: Arc::new(Mutex::new(Box::new(io::stdout()))),
            stderr: Arc::new(Mutex::new(Box::new(io::stderr()))),
            interactive: io::stdin().is_terminal(),
            stderr_is_terminal: io::stderr().is_terminal(),
        }
    }

    /// Whether standard input is attached to a terminal.
    pub(crate) fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub(crate) fn stderr_is_terminal(&self) -> bool {
        self.stderr_is_terminal
    }

    pub(crate) fn out(&self) -> ConsoleWriter {
        ConsoleWriter(Arc::clone(&self.stdout))
    }

    pub(crate) fn err(&self) -> ConsoleWriter {
        ConsoleWriter(Arc::clone(&self.stderr))
    }

    /// Reads one line from standard input. `None` means end of input.
    pub(crate) async fn read_line(&self, cancel: &CancelToken) -> Result<Option<String>, ExoError> {
        let stdin = Arc::clone(&self.stdin);
        let read = tokio::task::spawn_blocking(move || {
            let mut line = String::new();
            let mut reader = stdin.lock().unwrap_or_else(PoisonError::into_inner);
            reader
                .read_line(&mut line)
                .map(|read| (read > 0).then_some(line))
        });

        tokio::select! {
            res = read => Ok(res??),
            () = cancel.cancelled() => Err(ExoError::Cancelled),
        }
    }
}

pub(crate) struct ConsoleWriter(SharedWriter);

impl Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        io::{self, Write},
        sync::{Arc, Mutex},
    };

    use super::Console;

    #[derive(Clone, Default)]
    pub(crate) struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A console with scripted input whose output streams are captured.
    pub(crate) fn captured(stdin: &str, interactive: bool) -> (Console, Captured, Captured) {
        let stdout = Captured::default();
        let stderr = Captured::default();

        let console = Console {
            stdin: Arc::new(Mutex::new(Box::new(io::Cursor::new(
                stdin.as_bytes().to_vec(),
            )))),
            stdout: Arc::new(Mutex::new(Box::new(stdout.clone()))),
            stderr: Arc::new(Mutex::new(Box::new(stderr.clone()))),
            interactive,
            stderr_is_terminal: false,
        };

        (console, stdout, stderr)
    }
}
