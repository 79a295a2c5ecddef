//! Shared helper for modules that shell out to an external decoder
//! (ADS-B, ISM433/TPMS, TDOA capture — spec.md §4.5 Design Note "Child-
//! process management in modules"). Callers supply only a command line
//! and a per-line parser; this type owns spawning, line reading, and
//! guaranteed termination + reap on stop.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

/// Runs `program` with `args`, feeding each stdout line to `on_line` until
/// `stop()` is called or the child exits on its own.
///
/// The reader thread blocks on the child's stdout, so a stop signal alone
/// would not wake it up against a quiet child; `stop()` kills the child
/// first, which closes its end of the pipe and unblocks the read as EOF.
pub struct ChildProcessWorker {
    child: Arc<Mutex<Child>>,
    reader: Option<JoinHandle<()>>,
    child_pid: Option<u32>,
}

impl ChildProcessWorker {
    pub fn spawn<F>(program: &str, args: &[String], mut on_line: F) -> std::io::Result<Self>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let mut child: Child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let pid = child.id();
        let stdout = child.stdout.take().expect("piped stdout");
        let child = Arc::new(Mutex::new(child));

        let reader = thread::spawn(move || {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next() {
                    Some(Ok(line)) => on_line(&line),
                    Some(Err(_)) | None => break,
                }
            }
        });

        Ok(ChildProcessWorker {
            child,
            reader: Some(reader),
            child_pid: Some(pid),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child_pid
    }

    /// Kills the child (unblocking the reader via EOF), reaps it, and
    /// joins the reader thread.
    pub fn stop(mut self) {
        self.kill_and_join();
    }

    fn kill_and_join(&mut self) {
        let mut child = self.child.lock();
        let _ = child.kill();
        let _ = child.wait();
        drop(child);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ChildProcessWorker {
    fn drop(&mut self) {
        self.kill_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn captures_stdout_lines() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let collected = lines.clone();
        let worker = ChildProcessWorker::spawn(
            "printf",
            &["one\ntwo\nthree\n".to_string()],
            move |line| collected.lock().unwrap().push(line.to_string()),
        )
        .unwrap();
        worker.stop();
        let got = lines.lock().unwrap().clone();
        assert_eq!(got, vec!["one", "two", "three"]);
    }
}
