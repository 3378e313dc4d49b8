//! Terminal presentation helpers.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::pipeline::{PhaseRecord, PhaseStatus};

/// `2h 3m 41s`, omitting leading zero units.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Spinner shown while polling a long-running job.
pub fn poll_spinner(label: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} {msg}")
            .expect("static template"),
    );
    bar.set_prefix(label.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// One-line glyph strip for the run, one cell per phase.
pub fn progress_strip(records: &[PhaseRecord]) -> String {
    records
        .iter()
        .map(|record| match record.status {
            PhaseStatus::Succeeded => "✅",
            PhaseStatus::Skipped => "⊘",
            PhaseStatus::Failed => "❌",
            PhaseStatus::Stopped => "🛑",
            PhaseStatus::Pending => "⬜",
        })
        .collect()
}

/// Final run report printed after the loop ends.
pub fn print_summary(records: &[PhaseRecord]) {
    println!("\n{}", style("run summary").bold().underlined());
    for record in records {
        let glyph = match record.status {
            PhaseStatus::Succeeded => style("✔").green(),
            PhaseStatus::Skipped => style("⊘").dim(),
            PhaseStatus::Failed => style("✗").red(),
            PhaseStatus::Stopped => style("■").yellow(),
            PhaseStatus::Pending => style("·").dim(),
        };
        let timing = record
            .duration
            .map(|d| format!(" [{}]", format_duration(d)))
            .unwrap_or_default();
        println!(
            "  {glyph} {}{}  {}",
            style(&record.phase).bold(),
            timing,
            style(&record.detail).dim()
        );
    }
    println!("  {}", progress_strip(records));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formats_drop_leading_zero_units() {
        assert_eq!(format_duration(Duration::from_secs(41)), "41s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(7421)), "2h 3m 41s");
    }

    #[test]
    fn strip_reflects_phase_status() {
        let records = vec![
            PhaseRecord::skipped("a", "before start"),
            PhaseRecord::succeeded("b", "merged", None),
            PhaseRecord::pending("c"),
        ];
        assert_eq!(progress_strip(&records), "⊘✅⬜");
    }
}
