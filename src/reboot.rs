use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use colored::*;
use fs2::FileExt;
use log::{error, info, warn};
use thiserror::Error;

use crate::config::{MailConfig, RebootConfig};
use crate::mailer::{self, MailError};
use crate::system::HostInfo;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("another instance is already running")]
    AlreadyRunning,
    #[error("failed to open lock file {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("failed to read state file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to write state file {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
}

/// Exclusive advisory lock on a file, held for the lifetime of the guard.
/// Advisory means cooperative: only other volmon invocations taking the
/// same lock are excluded.
pub struct LockGuard {
    file: File,
}

impl LockGuard {
    /// Non-blocking acquisition. A held lock is a terminal condition for
    /// the caller, not something to wait out.
    pub fn acquire(path: &Path) -> Result<LockGuard, LockError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|source| LockError::Io { path: path.to_path_buf(), source })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(LockGuard { file }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(LockError::AlreadyRunning)
            }
            Err(source) => Err(LockError::Io { path: path.to_path_buf(), source }),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Persisted "when did we last notify" scalar behind a small interface, so
/// the decision logic never touches the filesystem directly.
pub trait DebounceStore {
    fn last_sent(&self) -> Result<Option<f64>, StateError>;
    fn record_sent(&self, timestamp: f64) -> Result<(), StateError>;
}

/// File-backed store: a single plain-text Unix timestamp, seconds with an
/// optional fractional part.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        FileStore { path }
    }
}

impl DebounceStore for FileStore {
    fn last_sent(&self) -> Result<Option<f64>, StateError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|source| StateError::Read { path: self.path.clone(), source })?;
        match raw.trim().parse::<f64>() {
            Ok(ts) => Ok(Some(ts)),
            Err(_) => {
                warn!(
                    "state file {} does not contain a timestamp, treating as never sent",
                    self.path.display()
                );
                Ok(None)
            }
        }
    }

    fn record_sent(&self, timestamp: f64) -> Result<(), StateError> {
        // Write-then-rename so a crash mid-write can't leave a truncated
        // timestamp behind.
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, format!("{timestamp}"))
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|source| StateError::Write { path: self.path.clone(), source })
    }
}

/// Terminal states of one notifier invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    RecentlySent,
    Sent,
    Failed,
}

pub fn needs_send(last_sent: Option<f64>, now: f64, min_interval_secs: u64) -> bool {
    match last_sent {
        None => true,
        Some(last) => now - last >= min_interval_secs as f64,
    }
}

/// The debounce decision plus the send, with the transport injected. The
/// timestamp is only recorded after a successful send, so a failed send
/// leaves the state untouched and the next scheduled run retries.
pub fn decide_and_send<S, F>(store: &S, send: F, now: f64, min_interval_secs: u64) -> Outcome
where
    S: DebounceStore,
    F: FnOnce() -> Result<(), MailError>,
{
    let last_sent = match store.last_sent() {
        Ok(last) => last,
        Err(e) => {
            warn!("could not read debounce state, treating as never sent: {e}");
            None
        }
    };

    if !needs_send(last_sent, now, min_interval_secs) {
        return Outcome::RecentlySent;
    }

    match send() {
        Ok(()) => {
            if let Err(e) = store.record_sent(now) {
                // The mail went out; losing the timestamp only risks one
                // duplicate on the next run.
                error!("notification sent but state could not be recorded: {e}");
            }
            Outcome::Sent
        }
        Err(e) => {
            error!("failed to send reboot notification: {e}");
            Outcome::Failed
        }
    }
}

pub fn render_subject(cfg: &RebootConfig) -> String {
    format!("Notice: server rebooted - {}", cfg.unit_name)
}

pub fn render_body(cfg: &RebootConfig, host: &HostInfo, when: &chrono::DateTime<chrono::Local>) -> String {
    format!(
        "<html>\n<body style=\"font-family: Arial, sans-serif;\">\n\
         <div style=\"background-color: #c62828; color: white; padding: 16px;\">\n\
         <h2 style=\"margin: 0;\">Server rebooted - {}</h2>\n\
         </div>\n\
         <div style=\"padding: 16px;\">\n\
         <p>This is an automatic notice that the server came back up after a reboot.</p>\n\
         <div style=\"background-color: #fff3cd; border-left: 6px solid #ffc107; padding: 12px 16px;\">\n\
         <strong>Date and time:</strong> {}\n\
         </div>\n\
         <p>Please verify that all essential services restarted correctly.</p>\n\
         <p style=\"color: #777;\"><em>Automatic notice from {} ({} {}).</em></p>\n\
         </div>\n</body>\n</html>\n",
        cfg.unit_name,
        when.format("%d-%m-%Y %H:%M:%S"),
        host.hostname,
        host.os_name,
        host.os_version,
    )
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

/// One full notifier invocation. Returns the process exit code: 1 for a
/// lock conflict, 0 for everything else including a failed send.
pub fn run(cfg: &RebootConfig, mail: &MailConfig) -> i32 {
    let host = crate::system::host_info();
    println!("{}", crate::system::host_line(&host));

    let _lock = match LockGuard::acquire(&cfg.lock_file) {
        Ok(guard) => guard,
        Err(LockError::AlreadyRunning) => {
            println!("already running");
            return 1;
        }
        Err(e) => {
            error!("{e}");
            eprintln!("{} {}", "ERROR".red().bold(), e);
            return 2;
        }
    };

    let store = FileStore::new(cfg.state_file.clone());
    let subject = render_subject(cfg);
    let body = render_body(cfg, &host, &chrono::Local::now());

    let outcome = decide_and_send(
        &store,
        || mailer::send_html(mail, &subject, body),
        unix_now(),
        cfg.min_resend_interval_secs,
    );

    match outcome {
        Outcome::RecentlySent => {
            println!(
                "{}",
                "Reboot notification already sent recently, nothing to do.".green()
            );
            0
        }
        Outcome::Sent => {
            info!("reboot notification sent to {} recipient(s)", mail.recipients.len());
            println!(
                "{} Reboot notification sent to {} recipient(s).",
                "SUCCESS".green().bold(),
                mail.recipients.len().to_string().cyan(),
            );
            0
        }
        Outcome::Failed => {
            eprintln!(
                "{}",
                "ERROR Failed to send reboot notification, will retry on the next run."
                    .red()
                    .bold(),
            );
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn store_in(dir: &tempfile::TempDir) -> FileStore {
        FileStore::new(dir.path().join("last-reboot-mail"))
    }

    #[test]
    fn missing_state_file_reads_as_never_sent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.last_sent().unwrap(), None);
    }

    #[test]
    fn state_roundtrips_with_fractional_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.record_sent(1724400000.25).unwrap();
        assert_eq!(store.last_sent().unwrap(), Some(1724400000.25));
        // Overwrite, don't append.
        store.record_sent(1724403600.0).unwrap();
        assert_eq!(store.last_sent().unwrap(), Some(1724403600.0));
    }

    #[test]
    fn malformed_state_file_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(dir.path().join("last-reboot-mail"), "not a timestamp").unwrap();
        assert_eq!(store.last_sent().unwrap(), None);
    }

    #[test]
    fn needs_send_respects_the_interval() {
        assert!(needs_send(None, 1000.0, 600));
        assert!(!needs_send(Some(500.0), 1000.0, 600));
        // Exactly at the boundary counts as elapsed.
        assert!(needs_send(Some(400.0), 1000.0, 600));
    }

    #[test]
    fn first_invocation_sends_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let outcome = decide_and_send(&store, || Ok(()), 1000.0, 600);
        assert_eq!(outcome, Outcome::Sent);
        assert_eq!(store.last_sent().unwrap(), Some(1000.0));
    }

    #[test]
    fn second_invocation_within_interval_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(decide_and_send(&store, || Ok(()), 1000.0, 600), Outcome::Sent);

        let sends = Cell::new(0u32);
        let outcome = decide_and_send(
            &store,
            || {
                sends.set(sends.get() + 1);
                Ok(())
            },
            1200.0,
            600,
        );
        assert_eq!(outcome, Outcome::RecentlySent);
        assert_eq!(sends.get(), 0);
        assert_eq!(store.last_sent().unwrap(), Some(1000.0));
    }

    #[test]
    fn invocation_after_interval_sends_again() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(decide_and_send(&store, || Ok(()), 1000.0, 600), Outcome::Sent);
        assert_eq!(decide_and_send(&store, || Ok(()), 1700.0, 600), Outcome::Sent);
        assert_eq!(store.last_sent().unwrap(), Some(1700.0));
    }

    #[test]
    fn failed_send_leaves_state_untouched_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let outcome = decide_and_send(
            &store,
            || Err(MailError::Transport("connection refused".to_string())),
            1000.0,
            600,
        );
        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(store.last_sent().unwrap(), None);

        // Next run is free to send.
        assert_eq!(decide_and_send(&store, || Ok(()), 1001.0, 600), Outcome::Sent);
    }

    #[test]
    fn lock_excludes_a_second_holder_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reboot.lock");

        let first = LockGuard::acquire(&path).unwrap();
        match LockGuard::acquire(&path) {
            Err(LockError::AlreadyRunning) => {}
            other => panic!("expected lock conflict, got {:?}", other.is_ok()),
        }

        drop(first);
        LockGuard::acquire(&path).unwrap();
    }
}
