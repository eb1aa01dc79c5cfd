//! Output rendering and formatting

use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use console::style;
use crossgrader_ops::{
    BatchSummary, CleanupReport, InstallFromReport, OperationResult, StagePlan, StageReport,
};
use crossgrader_state::StageOutcome;
use crossgrader_types::Stage;
use std::io;
use std::path::PathBuf;

use crate::events::reason_label;

/// Output renderer for CLI results
#[derive(Clone)]
pub struct OutputRenderer {
    /// Use JSON output format
    json_output: bool,
}

impl OutputRenderer {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    /// Render operation result
    pub fn render_result(&self, result: &OperationResult) -> io::Result<()> {
        if self.json_output {
            let json = result.to_json().map_err(io::Error::other)?;
            println!("{json}");
            return Ok(());
        }
        match result {
            OperationResult::Stage(report) => self.render_stage_report(report),
            OperationResult::InstallFrom(report) => self.render_install_from(report),
            OperationResult::Cleanup(report) => self.render_cleanup(report),
            OperationResult::Success(message) => {
                println!("{message}");
                Ok(())
            }
        }
    }

    /// Show a plan before asking for confirmation
    pub fn render_plan(&self, stage: Stage, plan: &StagePlan) {
        if self.json_output {
            return;
        }
        if stage == Stage::Third {
            println!("{} packages to purge:", plan.removals.len());
            for name in &plan.removals {
                println!("  {name}");
            }
            return;
        }

        if !plan.emulation.is_empty() {
            println!(
                "Emulation layer first: {}",
                style(plan.emulation.join(" ")).bold()
            );
        }
        if !plan.emulation_cache.is_empty() {
            println!(
                "Cached emulation packages to reinstall: {}",
                plan.emulation_cache.len()
            );
        }
        if plan.selection.is_empty() {
            println!("Nothing to crossgrade.");
            return;
        }

        let mut table = new_table(&["Package", "Reason"]);
        for (name, reason) in plan.selection.iter() {
            table.add_row(vec![Cell::new(name), Cell::new(reason_label(reason))]);
        }
        println!("{table}");
        println!(
            "{} targets in {} batches",
            plan.selection.len(),
            plan.batches.len()
        );
        if !plan.unavailable.is_empty() {
            println!(
                "{} no target build, skipped: {}",
                style("warning:").yellow(),
                plan.unavailable.join(" ")
            );
        }
    }

    fn render_stage_report(&self, report: &StageReport) -> io::Result<()> {
        if report.dry_run {
            self.render_plan(report.stage, &report.plan);
            println!("Dry run: nothing was changed.");
            return Ok(());
        }

        let mut table = new_table(&["Stage", "Target", "Source", "Outcome", "Started", "Duration"]);
        table.add_row(vec![
            Cell::new(report.stage),
            Cell::new(&report.target),
            Cell::new(&report.source),
            outcome_cell(report),
            Cell::new(
                report
                    .started_at
                    .with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S"),
            ),
            Cell::new(format!("{:.1}s", report.duration_ms as f64 / 1000.0)),
        ]);
        println!("{table}");

        if report.download_only {
            println!(
                "Downloaded {} packages. Install them with --install-from.",
                report.downloaded
            );
            return Ok(());
        }

        if report.stage == Stage::Third {
            println!("Purged {} packages.", report.removed.len());
        } else {
            println!(
                "{} crossgraded, {} already in {}.",
                report.crossgraded.len(),
                report.converged,
                report.target
            );
        }
        self.render_batches(&report.batches);

        if !report.stuck.is_empty() {
            println!("{}", style("Packages left unconfigured:").red().bold());
            for name in &report.stuck {
                println!("  {name}");
            }
        }
        if !report.preflight_mismatches.is_empty() {
            println!(
                "{}",
                style(format!("Boot binaries not built for {}:", report.target))
                    .red()
                    .bold()
            );
            for path in &report.preflight_mismatches {
                println!("  {path}");
            }
        }
        if !report.plan.unavailable.is_empty() {
            println!(
                "Skipped without a target build: {}",
                report.plan.unavailable.join(" ")
            );
        }

        if report.is_success() {
            match report.stage {
                Stage::First => println!(
                    "Reboot, then run: crossgrader {} --second-stage",
                    report.target
                ),
                Stage::Second => println!(
                    "Next: crossgrader {} --third-stage {}",
                    report.target, report.source
                ),
                Stage::Third if report.stuck.is_empty() => println!(
                    "If desired, run dpkg --remove-architecture {} to finish.",
                    report.source
                ),
                Stage::Third => {}
            }
        }
        Ok(())
    }

    fn render_batches(&self, batches: &[BatchSummary]) {
        let failed: Vec<&BatchSummary> = batches.iter().filter(|b| !b.converged).collect();
        if failed.is_empty() {
            return;
        }
        let mut table = new_table(&["Batch", "Installed", "Retried", "Failed", "Stopped"]);
        for batch in failed {
            let failures: Vec<String> = batch
                .failed
                .iter()
                .map(|(pkg, kind)| format!("{pkg} ({kind})"))
                .collect();
            table.add_row(vec![
                Cell::new(&batch.batch_id),
                Cell::new(batch.succeeded.len()),
                Cell::new(batch.retried.len()),
                Cell::new(failures.join("\n")).fg(Color::Red),
                Cell::new(batch.stopped.as_deref().unwrap_or("-")),
            ]);
        }
        println!("{table}");
    }

    fn render_install_from(&self, report: &InstallFromReport) -> io::Result<()> {
        if report.debs == 0 {
            println!("No .deb files in {}.", report.dir.display());
            return Ok(());
        }
        println!("Installed from {}: {} debs", report.dir.display(), report.debs);
        if let Some(batch) = &report.batch {
            println!(
                "{} installed, {} after retry, {} failed",
                batch.succeeded.len(),
                batch.retried.len(),
                batch.failed.len()
            );
            self.render_batches(std::slice::from_ref(batch));
        }
        Ok(())
    }

    fn render_cleanup(&self, report: &CleanupReport) -> io::Result<()> {
        if report.storage_removed {
            println!("crossgrader data folder removed.");
        } else {
            println!("crossgrader data folder did not exist.");
        }
        if report.hook_removed {
            println!("Arch-check hook removed.");
        } else {
            println!("Arch-check hook was not installed.");
        }
        Ok(())
    }

    /// List debs before `--install-from` asks for confirmation
    pub fn render_debs(&self, dir: &std::path::Path, debs: &[PathBuf]) {
        if self.json_output {
            return;
        }
        println!("Installing the following .debs from {}:", dir.display());
        for deb in debs {
            println!("  {}", deb.display());
        }
    }
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
        );
    table
}

fn outcome_cell(report: &StageReport) -> Cell {
    match report.outcome {
        Some(StageOutcome::Done) => Cell::new("done").fg(Color::Green),
        Some(StageOutcome::Forced) => Cell::new("forced").fg(Color::Yellow),
        Some(StageOutcome::Failed) => Cell::new("failed").fg(Color::Red),
        None => Cell::new("-"),
    }
}
