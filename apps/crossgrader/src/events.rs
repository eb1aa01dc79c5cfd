//! Event handling and progress display

use console::{style, Term};
use crossgrader_events::{
    AppEvent, DownloadEvent, EventMessage, GeneralEvent, GuardEvent, ResolverEvent,
    SelectionReason, SnapshotEvent, StageEvent, TransactionEvent,
};

use crate::logging::log_event_with_tracing;

/// Renders events on stderr while an operation runs
///
/// Every event is also mirrored into `tracing`. In JSON mode nothing is
/// printed so stdout carries only the final result.
pub struct EventHandler {
    term: Term,
    debug: bool,
    quiet: bool,
    /// Lines written, for tests
    rendered: usize,
}

impl EventHandler {
    pub fn new(debug: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            debug,
            quiet,
            rendered: 0,
        }
    }

    /// Handle incoming event
    pub fn handle_event(&mut self, message: EventMessage) {
        log_event_with_tracing(&message);
        if self.quiet {
            return;
        }
        if let Some(line) = self.render(&message.event) {
            self.show(&line);
        }
    }

    #[cfg(test)]
    fn rendered(&self) -> usize {
        self.rendered
    }

    fn show(&mut self, line: &str) {
        self.rendered += 1;
        self.term.write_line(line).unwrap_or(());
    }

    fn render(&self, event: &AppEvent) -> Option<String> {
        match event {
            AppEvent::General(general) => self.render_general(general),
            AppEvent::Stage(stage) => Some(render_stage(stage)),
            AppEvent::Transaction(tx) => self.render_transaction(tx),
            AppEvent::Resolver(resolver) => self.render_resolver(resolver),
            AppEvent::Download(download) => self.render_download(download),
            AppEvent::Guard(guard) => self.render_guard(guard),
            AppEvent::Snapshot(snapshot) => self.render_snapshot(snapshot),
            // Command lines go to the debug log only
            AppEvent::Platform(_) => None,
        }
    }

    fn render_general(&self, event: &GeneralEvent) -> Option<String> {
        match event {
            GeneralEvent::Warning { message, context } => Some(match context {
                Some(context) => format!("{} {message}: {context}", style("warning:").yellow()),
                None => format!("{} {message}", style("warning:").yellow()),
            }),
            GeneralEvent::Error { message, details } => Some(match details {
                Some(details) => format!("{} {message}: {details}", style("error:").red()),
                None => format!("{} {message}", style("error:").red()),
            }),
            GeneralEvent::CancellationRequested => Some(format!(
                "{} stopping after the current package-manager call",
                style("interrupted:").yellow()
            )),
            GeneralEvent::DebugLog { message, .. } if self.debug => {
                Some(style(message).dim().to_string())
            }
            GeneralEvent::OperationStarted { operation } if self.debug => {
                Some(style(format!("{operation}...")).dim().to_string())
            }
            GeneralEvent::OperationFailed { operation, error } => Some(format!(
                "{} {operation} failed: {error}",
                style("error:").red()
            )),
            _ => None,
        }
    }

    fn render_transaction(&self, event: &TransactionEvent) -> Option<String> {
        match event {
            TransactionEvent::BatchStarted {
                batch_id,
                packages,
                already_converged,
            } => Some(format!(
                "{} {} packages ({} already converged)",
                style(batch_id).cyan(),
                packages.len(),
                already_converged
            )),
            TransactionEvent::PassStarted {
                batch_id,
                pass,
                pending,
            } if self.debug => Some(
                style(format!("{batch_id}: pass {pass}, {pending} pending"))
                    .dim()
                    .to_string(),
            ),
            TransactionEvent::PackageFailed {
                package, signature, ..
            } => Some(format!("  {} {package} ({signature})", style("failed").yellow())),
            TransactionEvent::RemediationApplied {
                package,
                remediation,
                success,
            } => Some(format!(
                "  {} {remediation} on {package}",
                if *success {
                    style("remediated").green()
                } else {
                    style("remediation failed").red()
                }
            )),
            TransactionEvent::BatchCompleted {
                batch_id,
                succeeded,
                retried,
                failed,
                passes,
            } => Some(format!(
                "{} {succeeded} installed, {retried} after retry, {} failed in {passes} passes",
                style(batch_id).cyan(),
                failed.len()
            )),
            TransactionEvent::Stalled {
                batch_id,
                passes,
                pending,
            } => Some(format!(
                "{} {batch_id} stalled after {passes} passes: {}",
                style("error:").red(),
                pending.join(" ")
            )),
            TransactionEvent::RemovalStarted { arch, packages } => Some(format!(
                "Purging {} packages from {}",
                packages.len(),
                style(arch).bold()
            )),
            TransactionEvent::RemovalCompleted {
                arch,
                removed,
                remaining,
            } => Some(if remaining.is_empty() {
                format!("Purged {removed} packages; nothing left in {arch}")
            } else {
                format!(
                    "{} could not purge from {arch}: {}",
                    style("warning:").yellow(),
                    remaining.join(" ")
                )
            }),
            _ => None,
        }
    }

    fn render_resolver(&self, event: &ResolverEvent) -> Option<String> {
        match event {
            ResolverEvent::OrderingCompleted {
                leading,
                total,
                batches,
                cycles_broken,
            } if self.debug || *cycles_broken > 0 => Some(format!(
                "Ordered {total} packages in {batches} batches ({leading} first, {cycles_broken} cycles broken)"
            )),
            ResolverEvent::CycleBroken {
                package,
                unresolved,
            } if self.debug => Some(
                style(format!(
                    "cycle broken at {package} (unresolved: {})",
                    unresolved.join(" ")
                ))
                .dim()
                .to_string(),
            ),
            _ => None,
        }
    }

    fn render_download(&self, event: &DownloadEvent) -> Option<String> {
        match event {
            DownloadEvent::Failed { package, failure } => Some(format!(
                "{} download of {package} failed: {}",
                style("warning:").yellow(),
                failure.message
            )),
            DownloadEvent::Completed { package, .. } if self.debug => {
                Some(style(format!("downloaded {package}")).dim().to_string())
            }
            _ => None,
        }
    }

    fn render_guard(&self, event: &GuardEvent) -> Option<String> {
        match event {
            GuardEvent::ArchitectureMismatch {
                path,
                expected,
                actual,
                owner,
                ..
            } => Some(format!(
                "{} {path} is {actual}, expected {expected}{}",
                style("warning:").yellow(),
                owner
                    .as_ref()
                    .map(|o| format!(" (from {o})"))
                    .unwrap_or_default()
            )),
            GuardEvent::VerificationCompleted {
                checked,
                mismatches,
                ..
            } => Some(format!(
                "Checked {checked} binaries, {mismatches} mismatched"
            )),
            GuardEvent::HookInstalled { path, .. } => {
                Some(format!("Installed arch-check hook in {path}"))
            }
            GuardEvent::HookRemoved { path } => Some(format!("Removed arch-check hook from {path}")),
            _ => None,
        }
    }

    fn render_snapshot(&self, event: &SnapshotEvent) -> Option<String> {
        match event {
            SnapshotEvent::JournalUpdated { stage, outcome, .. } if self.debug => Some(
                style(format!("journal: {stage} {outcome}"))
                    .dim()
                    .to_string(),
            ),
            SnapshotEvent::Captured { packages, .. } => {
                Some(format!("Recorded {packages} installed packages"))
            }
            _ => None,
        }
    }
}

fn render_stage(event: &StageEvent) -> String {
    match event {
        StageEvent::Started {
            stage,
            target,
            source,
            dry_run,
        } => format!(
            "{} {stage}: {source} -> {target}{}",
            style("Starting").bold(),
            if *dry_run { " (dry run)" } else { "" }
        ),
        StageEvent::TargetsSelected { summary, .. } => {
            let reasons: Vec<String> = summary
                .by_reason
                .iter()
                .map(|(reason, count)| format!("{} {count}", reason_label(*reason)))
                .collect();
            if reasons.is_empty() {
                format!("{} targets found", summary.total)
            } else {
                format!("{} targets found ({})", summary.total, reasons.join(", "))
            }
        }
        StageEvent::Unavailable {
            packages, skipped, ..
        } => format!(
            "{} no target build for {}{}",
            style("warning:").yellow(),
            packages.join(" "),
            if *skipped { " (skipped)" } else { "" }
        ),
        StageEvent::DryRun { batches, .. } => {
            format!(
                "Dry run: {} batches, {} packages",
                batches.len(),
                batches.iter().map(Vec::len).sum::<usize>()
            )
        }
        StageEvent::EmulationCrossgraded { packages, .. } => format!(
            "{} emulation layer: {}",
            style("Crossgraded").green(),
            packages.join(" ")
        ),
        StageEvent::InitramfsUpdated => "Rebuilt the initramfs".to_string(),
        StageEvent::InitramfsUpdateFailed { message } => format!(
            "{} update-initramfs failed: {message}",
            style("warning:").yellow()
        ),
        StageEvent::Completed {
            stage,
            forced,
            converged,
        } => format!(
            "{} {stage} ({converged} packages in place){}",
            style("Completed").green().bold(),
            if *forced { ", forced" } else { "" }
        ),
        StageEvent::Failed {
            stage,
            failure,
            stuck,
        } => {
            let mut line = format!(
                "{} {stage}: {}",
                style("Failed").red().bold(),
                failure.message
            );
            if !stuck.is_empty() {
                line.push_str(&format!("\n  stuck: {}", stuck.join(" ")));
            }
            if let Some(hint) = &failure.hint {
                line.push_str(&format!("\n  hint: {hint}"));
            }
            line
        }
    }
}

pub fn reason_label(reason: SelectionReason) -> &'static str {
    match reason {
        SelectionReason::Priority => "priority",
        SelectionReason::InitramfsHook => "initramfs hook",
        SelectionReason::ToolDependency => "crossgrader dependency",
        SelectionReason::LoginShell => "login shell",
        SelectionReason::AlwaysIncluded => "always included",
        SelectionReason::Emulation => "emulation",
        SelectionReason::Requested => "requested",
        SelectionReason::Remaining => "remaining",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgrader_types::Stage;

    fn message(event: AppEvent) -> EventMessage {
        EventMessage::from_event(event)
    }

    #[test]
    fn test_quiet_handler_renders_nothing() {
        let mut handler = EventHandler::new(false, true);
        handler.handle_event(message(AppEvent::General(GeneralEvent::warning("careful"))));
        assert_eq!(handler.rendered(), 0);
    }

    #[test]
    fn test_debug_events_need_debug_mode() {
        let mut handler = EventHandler::new(false, false);
        handler.handle_event(message(AppEvent::General(GeneralEvent::debug("noise"))));
        assert_eq!(handler.rendered(), 0);

        let mut handler = EventHandler::new(true, false);
        handler.handle_event(message(AppEvent::General(GeneralEvent::debug("noise"))));
        assert_eq!(handler.rendered(), 1);
    }

    #[test]
    fn test_stage_failure_lists_stuck_packages() {
        let line = render_stage(&StageEvent::Failed {
            stage: Stage::Second,
            failure: crossgrader_events::FailureContext::new(
                Some("stage.failed"),
                "stage two left packages unconfigured",
                None::<String>,
                false,
            ),
            stuck: vec!["libfoo:amd64".to_string()],
        });
        assert!(line.contains("stuck: libfoo:amd64"));
    }
}
