use std::env;
use std::path::PathBuf;

use thiserror::Error;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing or invalid required configuration keys: {}", .0.join(", "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    None,
    Starttls,
    Ssl,
}

/// SMTP settings shared by both subcommands. Credentials may both be empty,
/// which disables AUTH entirely.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub email_from: String,
    pub recipients: Vec<String>,
    pub security: SmtpSecurity,
}

impl MailConfig {
    pub fn use_auth(&self) -> bool {
        !(self.smtp_user.trim().is_empty() && self.smtp_pass.trim().is_empty())
    }
}

/// Which backup-side condition arms the alert when the backup volume is
/// configured and mounted. The two variants reproduce the two historical
/// behaviors of this tool; the integrator must pick one explicitly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackupCondition {
    /// Alert when the backup volume's free space drops below this many bytes.
    FreeBytes { threshold_bytes: u64 },
    /// Alert while the backup volume's percent-used is still below the same
    /// percent threshold applied to the primary volume.
    PercentUsed,
}

#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub unit_name: String,
    pub primary_path: String,
    pub backup_path: Option<String>,
    pub usage_threshold_percent: f64,
    pub backup_condition: Option<BackupCondition>,
}

#[derive(Debug, Clone)]
pub struct RebootConfig {
    pub unit_name: String,
    pub lock_file: PathBuf,
    pub state_file: PathBuf,
    pub min_resend_interval_secs: u64,
}

/// Collects every missing or malformed key before failing, so a bad
/// deployment surfaces all of its problems in one run.
struct EnvReader<L> {
    lookup: L,
    problems: Vec<String>,
}

impl<L: Fn(&str) -> Option<String>> EnvReader<L> {
    fn new(lookup: L) -> Self {
        EnvReader { lookup, problems: Vec::new() }
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&mut self, key: &str) -> String {
        match self.optional(key) {
            Some(v) => v,
            None => {
                self.problems.push(key.to_string());
                String::new()
            }
        }
    }

    fn required_u64(&mut self, key: &str, what: &str) -> u64 {
        let raw = self.required(key);
        if raw.is_empty() {
            return 0;
        }
        match raw.parse::<u64>() {
            Ok(v) => v,
            Err(_) => {
                self.problems.push(format!("{key} ({what})"));
                0
            }
        }
    }

    fn problem(&mut self, text: String) {
        self.problems.push(text);
    }

    fn finish(self) -> Result<(), ConfigError> {
        if self.problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(self.problems))
        }
    }
}

fn read_mail<L: Fn(&str) -> Option<String>>(r: &mut EnvReader<L>) -> MailConfig {
    let smtp_host = r.required("VOLMON_SMTP_HOST");

    let port_raw = r.required("VOLMON_SMTP_PORT");
    let smtp_port = match port_raw.parse::<u16>() {
        Ok(p) if p > 0 => p,
        _ if port_raw.is_empty() => 0,
        _ => {
            r.problem("VOLMON_SMTP_PORT (must be 1-65535)".to_string());
            0
        }
    };

    let smtp_user = r.optional("VOLMON_SMTP_USER").unwrap_or_default();
    let smtp_pass = r.optional("VOLMON_SMTP_PASS").unwrap_or_default();

    let email_from = r.required("VOLMON_EMAIL_FROM");
    if !email_from.is_empty() && !email_from.contains('@') {
        r.problem("VOLMON_EMAIL_FROM (must be a valid email address)".to_string());
    }

    let to_raw = r.required("VOLMON_RECIPIENTS");
    let recipients: Vec<String> = to_raw
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();
    if !to_raw.is_empty() {
        if recipients.is_empty() {
            r.problem("VOLMON_RECIPIENTS (must contain at least one address)".to_string());
        } else if recipients.iter().any(|a| !a.contains('@')) {
            r.problem("VOLMON_RECIPIENTS (one or more recipients appear invalid)".to_string());
        }
    }

    let security = match r.optional("VOLMON_SMTP_SECURITY").as_deref() {
        None => SmtpSecurity::Starttls,
        Some(s) => match s.to_lowercase().as_str() {
            "starttls" => SmtpSecurity::Starttls,
            "ssl" => SmtpSecurity::Ssl,
            "none" => {
                log::warn!("SMTP security is set to 'none'; mail will be sent unencrypted");
                SmtpSecurity::None
            }
            _ => {
                r.problem("VOLMON_SMTP_SECURITY (must be one of: none, starttls, ssl)".to_string());
                SmtpSecurity::Starttls
            }
        },
    };

    MailConfig {
        smtp_host,
        smtp_port,
        smtp_user,
        smtp_pass,
        email_from,
        recipients,
        security,
    }
}

pub fn load_check() -> Result<(CheckConfig, MailConfig), ConfigError> {
    load_check_from(|key| env::var(key).ok())
}

pub fn load_check_from<L: Fn(&str) -> Option<String>>(
    lookup: L,
) -> Result<(CheckConfig, MailConfig), ConfigError> {
    let mut r = EnvReader::new(lookup);
    let mail = read_mail(&mut r);

    let unit_name = r.required("VOLMON_UNIT_NAME");
    let primary_path = r.required("VOLMON_PRIMARY_PATH");

    let threshold_raw = r.required("VOLMON_USAGE_THRESHOLD_PERCENT");
    let usage_threshold_percent = match threshold_raw.parse::<f64>() {
        Ok(t) if (1.0..=100.0).contains(&t) => t,
        _ if threshold_raw.is_empty() => 0.0,
        _ => {
            r.problem("VOLMON_USAGE_THRESHOLD_PERCENT (must be between 1 and 100)".to_string());
            0.0
        }
    };

    let backup_path = r.optional("VOLMON_BACKUP_PATH");
    let backup_condition = if backup_path.is_some() {
        match r.required("VOLMON_BACKUP_CONDITION").to_lowercase().as_str() {
            "free-bytes" => {
                let gib = r.required_u64(
                    "VOLMON_BACKUP_FREE_THRESHOLD_GIB",
                    "must be a whole number of GiB",
                );
                Some(BackupCondition::FreeBytes { threshold_bytes: gib * GIB })
            }
            "percent-used" => Some(BackupCondition::PercentUsed),
            "" => None,
            _ => {
                r.problem(
                    "VOLMON_BACKUP_CONDITION (must be one of: free-bytes, percent-used)"
                        .to_string(),
                );
                None
            }
        }
    } else {
        None
    };

    r.finish()?;
    Ok((
        CheckConfig {
            unit_name,
            primary_path,
            backup_path,
            usage_threshold_percent,
            backup_condition,
        },
        mail,
    ))
}

pub fn load_reboot() -> Result<(RebootConfig, MailConfig), ConfigError> {
    load_reboot_from(|key| env::var(key).ok())
}

pub fn load_reboot_from<L: Fn(&str) -> Option<String>>(
    lookup: L,
) -> Result<(RebootConfig, MailConfig), ConfigError> {
    let mut r = EnvReader::new(lookup);
    let mail = read_mail(&mut r);

    let unit_name = r.required("VOLMON_UNIT_NAME");
    let lock_file = PathBuf::from(r.required("VOLMON_LOCK_FILE"));
    let state_file = PathBuf::from(r.required("VOLMON_STATE_FILE"));
    let min_resend_interval_secs =
        r.required_u64("VOLMON_MIN_RESEND_INTERVAL_SECS", "must be a number of seconds");

    r.finish()?;
    Ok((
        RebootConfig {
            unit_name,
            lock_file,
            state_file,
            min_resend_interval_secs,
        },
        mail,
    ))
}
