use colored::*;
use log::{info, warn};

use crate::config::{BackupCondition, CheckConfig, MailConfig};
use crate::mailer;
use crate::system::HostInfo;
use crate::usage::{self, VolumeUsageSample};

/// What the check saw on the backup side this run.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackupView {
    NotConfigured,
    NotMounted { path: String },
    Mounted { sample: VolumeUsageSample },
}

/// The alert predicate. The primary volume must be at or over the percent
/// threshold, and the backup volume must not be able to absorb the pressure:
/// an unconfigured or unmounted backup never suppresses the alert, a mounted
/// one suppresses it only while its configured condition stays false.
pub fn should_alert(cfg: &CheckConfig, primary: &VolumeUsageSample, backup: &BackupView) -> bool {
    if primary.percent_used < cfg.usage_threshold_percent {
        return false;
    }
    match backup {
        BackupView::NotConfigured | BackupView::NotMounted { .. } => true,
        BackupView::Mounted { sample } => match cfg.backup_condition {
            Some(BackupCondition::FreeBytes { threshold_bytes }) => {
                sample.free_bytes < threshold_bytes
            }
            Some(BackupCondition::PercentUsed) => {
                sample.percent_used < cfg.usage_threshold_percent
            }
            // Unreachable through the loader, which rejects a configured
            // backup without a condition; treat like an unmounted backup.
            None => true,
        },
    }
}

pub fn render_subject(cfg: &CheckConfig) -> String {
    format!("Disk usage alert - {}", cfg.unit_name)
}

fn volume_rows(label: &str, sample: &VolumeUsageSample) -> String {
    format!(
        "<h3 style=\"margin-bottom: 4px;\">{label}</h3>\n\
         <table style=\"border-collapse: collapse;\">\n\
         <tr><td style=\"padding: 2px 12px 2px 0;\">Path</td><td><strong>{}</strong></td></tr>\n\
         <tr><td style=\"padding: 2px 12px 2px 0;\">Used</td><td><strong>{:.2}%</strong></td></tr>\n\
         <tr><td style=\"padding: 2px 12px 2px 0;\">Total</td><td>{:.2} GiB</td></tr>\n\
         <tr><td style=\"padding: 2px 12px 2px 0;\">Used space</td><td>{:.2} GiB</td></tr>\n\
         <tr><td style=\"padding: 2px 12px 2px 0;\">Free space</td><td>{:.2} GiB</td></tr>\n\
         </table>\n",
        sample.path,
        sample.percent_used,
        sample.total_gib(),
        sample.used_gib(),
        sample.free_gib(),
    )
}

/// Renders the alert body. Pure function of the samples and configuration;
/// the transport never feeds back into it.
pub fn render_body(
    cfg: &CheckConfig,
    host: &HostInfo,
    primary: &VolumeUsageSample,
    backup: &BackupView,
) -> String {
    let mut body = format!(
        "<html>\n<body style=\"font-family: Arial, sans-serif;\">\n\
         <div style=\"background-color: #c62828; color: white; padding: 16px;\">\n\
         <h2 style=\"margin: 0;\">Disk usage alert - {}</h2>\n\
         </div>\n\
         <div style=\"padding: 16px;\">\n\
         <p>The primary volume crossed the configured usage threshold of \
         <strong>{:.0}%</strong>.</p>\n",
        cfg.unit_name, cfg.usage_threshold_percent,
    );

    body.push_str(&volume_rows("Primary volume", primary));

    match backup {
        BackupView::NotConfigured => {
            body.push_str("<h3 style=\"margin-bottom: 4px;\">Backup volume</h3>\n<p>Not configured.</p>\n");
        }
        BackupView::NotMounted { path } => {
            body.push_str(&format!(
                "<h3 style=\"margin-bottom: 4px;\">Backup volume</h3>\n<p><strong>{path}</strong> is not mounted.</p>\n"
            ));
        }
        BackupView::Mounted { sample } => {
            body.push_str(&volume_rows("Backup volume", sample));
            if let Some(BackupCondition::FreeBytes { threshold_bytes }) = cfg.backup_condition {
                body.push_str(&format!(
                    "<p>Backup free-space threshold: {:.2} GiB.</p>\n",
                    usage::gib(threshold_bytes)
                ));
            }
        }
    }

    body.push_str(&format!(
        "<p>Consider cleaning up or expanding storage.</p>\n\
         <p style=\"color: #777;\"><em>Automatic alert from {} ({} {}).</em></p>\n\
         </div>\n</body>\n</html>\n",
        host.hostname, host.os_name, host.os_version,
    ));
    body
}

/// Observes both volumes. Query failures degrade to the zero sample so a
/// broken statvfs never aborts the run; a zeroed primary simply reads as 0%
/// used and suppresses alerting until the query recovers.
pub fn observe(cfg: &CheckConfig) -> (VolumeUsageSample, BackupView) {
    let primary = match usage::query_usage(&cfg.primary_path) {
        Ok(sample) => sample,
        Err(e) => {
            warn!("primary usage query failed, treating as unknown: {e}");
            VolumeUsageSample::zero(&cfg.primary_path)
        }
    };

    let backup = match &cfg.backup_path {
        None => BackupView::NotConfigured,
        Some(path) if !usage::is_mounted(path) => BackupView::NotMounted { path: path.clone() },
        Some(path) => {
            let sample = match usage::query_usage(path) {
                Ok(sample) => sample,
                Err(e) => {
                    warn!("backup usage query failed, treating as unknown: {e}");
                    VolumeUsageSample::zero(path)
                }
            };
            BackupView::Mounted { sample }
        }
    };

    (primary, backup)
}

#[derive(serde::Serialize)]
struct CheckReport<'a> {
    unit_name: &'a str,
    host: &'a HostInfo,
    usage_threshold_percent: f64,
    primary: &'a VolumeUsageSample,
    backup: &'a BackupView,
    alert: bool,
}

/// One full threshold-check invocation. Returns the process exit code.
/// There is no debounce here: every invocation over threshold sends a fresh
/// alert, and the scheduler's period is the effective rate limit.
pub fn run(cfg: &CheckConfig, mail: &MailConfig, force_mail: bool, json: bool) -> i32 {
    let host = crate::system::host_info();
    let (primary, backup) = observe(cfg);
    let alert = should_alert(cfg, &primary, &backup);

    if json {
        // Report-only mode: print the observation and decision, send nothing.
        // Host info rides inside the report so stdout stays parseable.
        let report = CheckReport {
            unit_name: &cfg.unit_name,
            host: &host,
            usage_threshold_percent: cfg.usage_threshold_percent,
            primary: &primary,
            backup: &backup,
            alert,
        };
        return match serde_json::to_string_pretty(&report) {
            Ok(out) => {
                println!("{out}");
                0
            }
            Err(e) => {
                // A reporting failure, not a configuration error.
                log::error!("failed to serialize report: {e}");
                0
            }
        };
    } else {
        println!("{}", crate::system::host_line(&host));
        println!(
            "{} {} at {}% used (threshold {}%)",
            "Primary:".blue().bold(),
            primary.path.cyan(),
            format!("{:.2}", primary.percent_used).bold(),
            cfg.usage_threshold_percent,
        );
        match &backup {
            BackupView::NotConfigured => println!("{} not configured", "Backup:".blue().bold()),
            BackupView::NotMounted { path } => {
                println!("{} {} not mounted", "Backup:".blue().bold(), path.cyan())
            }
            BackupView::Mounted { sample } => println!(
                "{} {} at {}% used, {:.2} GiB free",
                "Backup:".blue().bold(),
                sample.path.cyan(),
                format!("{:.2}", sample.percent_used).bold(),
                sample.free_gib(),
            ),
        }
    }

    if !alert && !force_mail {
        println!("{}", "Disk usage within limits, no alert needed.".green());
        return 0;
    }

    if force_mail && !alert {
        println!("{}", "Forced mail mode: sending alert regardless of thresholds.".yellow().bold());
    } else {
        println!("{}", "Usage threshold crossed, sending alert.".red().bold());
    }

    let subject = render_subject(cfg);
    let body = render_body(cfg, &host, &primary, &backup);
    match mailer::send_html(mail, &subject, body) {
        Ok(()) => {
            info!("alert sent to {} recipient(s)", mail.recipients.len());
            println!(
                "{} Alert sent to {} recipient(s).",
                "SUCCESS".green().bold(),
                mail.recipients.len().to_string().cyan(),
            );
            0
        }
        Err(e) => {
            // Reported, not retried. The next scheduled run tries again.
            log::error!("failed to send alert: {e}");
            eprintln!("{} {}", "ERROR Failed to send alert:".red().bold(), e);
            0
        }
    }
}
