//! Sinks that hand batches to an external sender or a writer.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use super::{Batch, SinkError, TelemetrySink};

/// Default sender binary.
pub const DEFAULT_SENDER: &str = "/usr/local/bin/zabbix_sender";
/// Default sender agent configuration.
pub const DEFAULT_SENDER_CONFIG: &str = "/etc/zabbix_agentd.conf";

/// Writes each batch to a file and runs a zabbix_sender compatible program:
///
/// ```text
/// <program> -v -c <config> -s <host> -T -i <batch file>
/// ```
///
/// `-T` makes the sender use the timestamps carried by each line.
#[derive(Debug, Clone)]
pub struct CommandSink {
    program: PathBuf,
    config: PathBuf,
    batch_dir: Option<PathBuf>,
}

impl CommandSink {
    pub fn new(program: impl Into<PathBuf>, config: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config: config.into(),
            batch_dir: None,
        }
    }

    /// Directory for batch files. Defaults to the system temp directory.
    pub fn with_batch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.batch_dir = Some(dir.into());
        self
    }

    fn write_batch(&self, batch: &Batch) -> Result<tempfile::NamedTempFile, SinkError> {
        let mut file = match &self.batch_dir {
            Some(dir) => tempfile::Builder::new()
                .prefix("batch-")
                .suffix(".txt")
                .tempfile_in(dir)?,
            None => tempfile::Builder::new()
                .prefix("batch-")
                .suffix(".txt")
                .tempfile()?,
        };
        file.write_all(batch.render().as_bytes())?;
        file.flush()?;
        Ok(file)
    }
}

impl Default for CommandSink {
    fn default() -> Self {
        Self::new(DEFAULT_SENDER, DEFAULT_SENDER_CONFIG)
    }
}

impl TelemetrySink for CommandSink {
    fn send(&mut self, host: &str, batch: &Batch) -> Result<(), SinkError> {
        let file = self.write_batch(batch)?;

        let output = Command::new(&self.program)
            .arg("-v")
            .arg("-c")
            .arg(&self.config)
            .arg("-s")
            .arg(host)
            .arg("-T")
            .arg("-i")
            .arg(file.path())
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            "{} exited with {}: {}",
            self.program.display(),
            output.status,
            stdout.trim()
        );

        if output.status.success() {
            Ok(())
        } else {
            let combined = format!("{} {}", stdout.trim(), stderr.trim());
            Err(SinkError::Rejected {
                status: output.status.code(),
                output: combined.trim().to_string(),
            })
        }
    }
}

/// Writes batches to any writer, one line per sample. Used for dry runs.
#[derive(Debug, Default)]
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TelemetrySink for WriterSink<W> {
    fn send(&mut self, _host: &str, batch: &Batch) -> Result<(), SinkError> {
        for line in batch.lines() {
            writeln!(self.writer, "{}", line)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
