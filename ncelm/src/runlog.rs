//! Optional machine-readable log of a training run.
//!
//! Every line is `<unix time in seconds> <message>`, flushed as soon as it's
//! written so the file can be tailed during a long run.

use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

#[derive(Debug, Default)]
pub struct RunLog {
    out: Option<BufWriter<File>>,
}

impl RunLog {
    /// A log that discards everything.
    pub fn disabled() -> Self {
        RunLog::default()
    }

    /// Log to a fresh file at `path`, or nowhere if `path` is `None`.
    pub fn create(path: Option<&Path>) -> Result<Self> {
        let out = match path {
            None => None,
            Some(path) => Some(BufWriter::new(
                File::create(path).with_context(|| format!("failed to create log file {path:?}"))?,
            )),
        };
        Ok(RunLog { out })
    }

    pub fn is_enabled(&self) -> bool {
        self.out.is_some()
    }

    pub fn info(&mut self, msg: impl Display) -> Result<()> {
        let Some(out) = &mut self.out else {
            return Ok(());
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        writeln!(out, "{now:.3} {msg}").context("failed to write log file")?;
        out.flush().context("failed to write log file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let mut log = RunLog::create(Some(&path)).unwrap();
        assert!(log.is_enabled());
        log.info("first").unwrap();
        log.info(format_args!("loss: {:.6}", 1.5)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let (stamp, msg) = lines[1].split_once(' ').unwrap();
        assert!(stamp.parse::<f64>().unwrap() > 0.0);
        assert_eq!(msg, "loss: 1.500000");
    }

    #[test]
    fn disabled_log_accepts_everything() {
        let mut log = RunLog::disabled();
        assert!(!log.is_enabled());
        log.info("ignored").unwrap();
    }
}
