//! Statistics and summary printing.

use colored::Colorize;
use log::info;
use strum::IntoEnumIterator;

use crate::classify::ProbeCategory;
use crate::error_handling::{FailureKind, ProbeStats};
use crate::models::{DetectionReport, RateLimitProfile, RunStatus, TierOutcome};

/// Prints probe outcome, failure and retry counts to the log.
pub fn print_probe_statistics(stats: &ProbeStats) {
    let total_probes = stats.total_probes();
    if total_probes == 0 {
        return;
    }

    info!("Probe Outcomes ({} total):", total_probes);
    for category in ProbeCategory::iter() {
        let count = stats.get_category_count(category);
        if count > 0 {
            info!("   {:?}: {}", category, count);
        }
    }

    let total_failures = stats.total_failures();
    if total_failures > 0 {
        info!("Transport Failures ({} total):", total_failures);
        for kind in FailureKind::iter() {
            let count = stats.get_failure_count(kind);
            if count > 0 {
                info!("   {:?}: {}", kind, count);
            }
        }
    }

    if stats.retries() > 0 {
        info!("Retries: {}", stats.retries());
    }
    if stats.malformed_headers() > 0 {
        info!("Malformed rate-limit headers: {}", stats.malformed_headers());
    }
}

/// One line per tier describing how it ended.
fn tier_lines(profile: &RateLimitProfile) -> Vec<String> {
    profile
        .tiers
        .iter()
        .map(|tier| {
            let outcome = match &tier.outcome {
                TierOutcome::LimitFound {
                    limit,
                    detected_via,
                    optimal_rate,
                    ..
                } => format!(
                    "{} {} per {}s (via {}, use {:.1})",
                    "limit".green(),
                    limit,
                    tier.window_seconds,
                    detected_via,
                    optimal_rate
                ),
                TierOutcome::Exhausted {
                    rate_reached,
                    reason,
                    ..
                } => format!(
                    "{} up to {} per {}s ({:?})",
                    "no limit".yellow(),
                    rate_reached,
                    tier.window_seconds,
                    reason
                ),
                TierOutcome::Aborted { reason } => format!("{} ({})", "aborted".red(), reason),
            };
            format!(
                "   {}: {} [{} probes, {:.1}% errors]",
                tier.tier_name,
                outcome,
                tier.probes_sent,
                tier.error_rate * 100.0
            )
        })
        .collect()
}

/// Prints a short human-readable summary of a finished run.
pub fn print_report_summary(report: &DetectionReport) {
    for site in &report.sites {
        let profile = &site.profile;
        let status = match &profile.run_status {
            RunStatus::Determined => "determined".green(),
            RunStatus::Exhausted => "exhausted".yellow(),
            RunStatus::Aborted { reason } => format!("aborted: {}", reason).red(),
        };
        info!(
            "{} ({}): {} - {} requests in {:.1}s",
            profile.site_name.bold(),
            profile.base_url,
            status,
            profile.total_requests_sent,
            profile.total_duration_seconds
        );
        for line in tier_lines(profile) {
            info!("{}", line);
        }
        match (&profile.most_restrictive_tier, profile.recommended_rate) {
            (Some(tier), Some(rate)) => info!(
                "   Most restrictive: {}; recommended rate {:.4} req/s ({:.1}/min)",
                tier,
                rate,
                rate * 60.0
            ),
            (None, Some(rate)) => info!("   Recommended rate (lower bound): {:.4} req/s", rate),
            _ => {}
        }
        for warning in &profile.consistency_warnings {
            log::warn!("   {}", warning);
        }
    }

    for failure in &report.failures {
        log::error!("{}: {}", failure.site_name.bold(), failure.error);
    }

    info!(
        "Tested {} site{} ({} failed) in {:.1}s",
        report.sites.len() + report.failures.len(),
        if report.sites.len() + report.failures.len() == 1 {
            ""
        } else {
            "s"
        },
        report.failures.len(),
        report.elapsed_seconds
    );
    if let Some(path) = &report.output_path {
        info!("Results saved to {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AbortReason, SiteFailure, SiteReport, TierResult};
    use chrono::Utc;

    fn profile() -> RateLimitProfile {
        let mut tier = TierResult::not_run("minute", 60, 10.0, AbortReason::Cancelled);
        tier.probes_sent = 4;
        RateLimitProfile {
            site_name: "api".to_string(),
            base_url: "https://api.example.com".to_string(),
            run_status: RunStatus::Aborted {
                reason: "cancelled".to_string(),
            },
            tiers: vec![tier],
            reconciliation: Vec::new(),
            most_restrictive_tier: None,
            recommended_rate: None,
            total_requests_sent: 4,
            total_duration_seconds: 1.0,
            endpoints_tested: vec!["/users".to_string()],
            preflight_limits: Vec::new(),
            consistency_warnings: Vec::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_tier_lines_describe_outcome() {
        colored::control::set_override(false);
        let lines = tier_lines(&profile());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("minute: aborted (cancelled)"), "{}", lines[0]);
        assert!(lines[0].contains("4 probes"));
    }

    #[test]
    fn test_print_report_summary_with_failures() {
        let report = DetectionReport {
            started_at: Utc::now(),
            sites: vec![SiteReport {
                site_name: "api".to_string(),
                profile: profile(),
                recommendation: None,
            }],
            failures: vec![SiteFailure {
                site_name: "down".to_string(),
                error: "unreachable".to_string(),
            }],
            output_path: None,
            elapsed_seconds: 2.0,
        };
        // Should not panic
        print_report_summary(&report);
    }

    #[test]
    fn test_print_probe_statistics() {
        let stats = ProbeStats::new();
        print_probe_statistics(&stats);
        stats.increment_category(ProbeCategory::Success);
        stats.increment_failure(FailureKind::Timeout);
        stats.add_retries(2);
        print_probe_statistics(&stats);
    }
}
