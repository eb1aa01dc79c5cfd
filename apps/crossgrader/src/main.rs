//! crossgrader - crossgrade a Debian system to another architecture
//!
//! Thin CLI over the ops crate: it loads configuration, builds the dpkg
//! adapter, renders events while an operation runs and maps the outcome to
//! an exit code.

mod cli;
mod display;
mod error;
mod events;
mod logging;
mod setup;

use crate::cli::{Action, Cli};
use crate::display::OutputRenderer;
use crate::error::CliError;
use crate::events::EventHandler;
use crate::setup::SystemSetup;
use clap::Parser;
use crossgrader_config::{fixed_paths, Config};
use crossgrader_errors::{Error, StageError};
use crossgrader_events::{AppEvent, EventEmitter, EventReceiver, EventSender, GeneralEvent};
use crossgrader_install::{cancellation, CancelHandle};
use crossgrader_ops::{
    archived_debs, cleanup, install_from, CrossgradeSession, OperationResult, OpsContextBuilder,
    OpsCtx, StageController,
};
use crossgrader_types::{ColorChoice, OutputFormat};
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::future::Future;
use std::process;
use tokio::select;
use tracing::{error, info};

/// Exit code after a second interrupt
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(e.exit_code());
        }
    };
    let json_mode = cli.global.json || config.general.default_output == OutputFormat::Json;
    init_tracing(json_mode, cli.global.debug, &config);
    apply_color(config.general.color);

    if let Err(e) = run(cli, config, json_mode).await {
        error!(code = e.code(), "Application error: {}", e);
        if !json_mode {
            eprintln!("Error: {e}");
        }
        process::exit(e.exit_code());
    }
}

/// Main application logic
async fn run(cli: Cli, config: Config, json_mode: bool) -> Result<(), CliError> {
    info!("Starting crossgrader v{}", env!("CARGO_PKG_VERSION"));

    let Some(action) = cli.action() else {
        return Err(CliError::Setup(
            "no target architecture given".to_string(),
        ));
    };

    let setup = SystemSetup::new(config.clone());
    // Cleanup must not recreate the directory it is about to remove
    if action != Action::Cleanup {
        setup.initialize().await?;
    }

    let (event_sender, mut event_receiver) = crossgrader_events::channel();
    let (cancel_handle, cancel) = cancellation();
    spawn_interrupt_handler(cancel_handle, event_sender.clone());

    let ctx = OpsContextBuilder::new()
        .with_package_manager(setup.package_manager(&event_sender))
        .with_event_sender(event_sender)
        .with_config(config)
        .with_platform(setup.platform().clone())
        .with_cancellation(cancel)
        .build()?;

    let renderer = OutputRenderer::new(json_mode);
    let mut events = EventStream {
        receiver: &mut event_receiver,
        handler: EventHandler::new(cli.global.debug, json_mode),
    };

    let result = match action {
        Action::Cleanup => OperationResult::Cleanup(events.drive(cleanup(&ctx)).await?),
        Action::InstallFrom(dir) => {
            run_install_from(&ctx, &cli, dir.as_deref(), &renderer, &mut events).await?
        }
        Action::Stage {
            target,
            stage,
            from,
        } => {
            let session = events
                .drive(CrossgradeSession::open(
                    &ctx,
                    target,
                    stage,
                    from,
                    cli.session_options(),
                ))
                .await?;
            let controller = StageController::new(&ctx, session);
            let plan = events.drive(controller.prepare()).await?;

            if !controller.session().is_dry_run() && !plan.is_empty() {
                renderer.render_plan(stage, &plan);
                if !confirm(cli.yes)? {
                    return render_aborted(&renderer);
                }
            }
            let report = events.drive(controller.execute(plan)).await?;
            OperationResult::Stage(Box::new(report))
        }
    };

    renderer.render_result(&result)?;
    if let Some(e) = failure_of(&result) {
        return Err(e.into());
    }
    info!("Command completed successfully");
    Ok(())
}

async fn run_install_from(
    ctx: &OpsCtx,
    cli: &Cli,
    dir: Option<&std::path::Path>,
    renderer: &OutputRenderer,
    events: &mut EventStream<'_>,
) -> Result<OperationResult, CliError> {
    let (dir, debs) = events.drive(archived_debs(ctx, dir)).await?;
    if debs.is_empty() {
        return Ok(OperationResult::InstallFrom(
            events.drive(install_from(ctx, Some(&dir))).await?,
        ));
    }
    renderer.render_debs(&dir, &debs);
    if cli.dry_run {
        return Ok(OperationResult::Success(
            "Dry run: nothing was installed.".to_string(),
        ));
    }
    if !confirm(cli.yes)? {
        return Ok(OperationResult::Success("Aborted.".to_string()));
    }
    Ok(OperationResult::InstallFrom(
        events.drive(install_from(ctx, Some(&dir))).await?,
    ))
}

/// Error for a result that finished but did not succeed
fn failure_of(result: &OperationResult) -> Option<Error> {
    match result {
        OperationResult::Stage(report) => report.error(),
        OperationResult::InstallFrom(report) if !report.stuck.is_empty() => Some(
            StageError::Failed {
                stage: "install-from".to_string(),
                stuck: report.stuck.clone(),
            }
            .into(),
        ),
        _ => None,
    }
}

fn render_aborted(renderer: &OutputRenderer) -> Result<(), CliError> {
    renderer.render_result(&OperationResult::Success("Aborted.".to_string()))?;
    Ok(())
}

fn confirm(yes: bool) -> Result<bool, CliError> {
    if yes {
        return Ok(true);
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Do you want to continue?")
        .default(false)
        .interact()
        .map_err(|e| CliError::Prompt(e.to_string()))
}

/// Event receiver plus its renderer, drained while operations run
struct EventStream<'a> {
    receiver: &'a mut EventReceiver,
    handler: EventHandler,
}

impl EventStream<'_> {
    /// Run `operation` while rendering its events
    async fn drive<T, F>(&mut self, operation: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let mut operation = Box::pin(operation);
        loop {
            select! {
                result = &mut operation => {
                    while let Ok(message) = self.receiver.try_recv() {
                        self.handler.handle_event(message);
                    }
                    return result;
                }
                Some(message) = self.receiver.recv() => {
                    self.handler.handle_event(message);
                }
            }
        }
    }
}

/// First Ctrl-C stops between package-manager calls, the second exits
fn spawn_interrupt_handler(handle: CancelHandle, tx: EventSender) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tx.emit(AppEvent::General(GeneralEvent::CancellationRequested));
        handle.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            process::exit(EXIT_INTERRUPTED);
        }
    });
}

/// Load configuration with proper precedence: file, environment, flags
async fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = Config::load_or_default(cli.global.config.as_deref()).await?;
    config.merge_env()?;

    if let Some(color) = cli.global.color {
        config.general.color = color;
    }
    if cli.no_preflight {
        config.verify.preflight = false;
    }
    Ok(config)
}

fn apply_color(choice: ColorChoice) {
    match choice {
        ColorChoice::Always => {
            console::set_colors_enabled(true);
            console::set_colors_enabled_stderr(true);
        }
        ColorChoice::Never => {
            console::set_colors_enabled(false);
            console::set_colors_enabled_stderr(false);
        }
        ColorChoice::Auto => {}
    }
}

/// Initialize tracing/logging
fn init_tracing(json_mode: bool, debug_flag: bool, config: &Config) {
    let debug_enabled = std::env::var("RUST_LOG").is_ok() || debug_flag;

    if debug_enabled {
        let log_dir = config.storage_dir();
        let log_file = log_dir.join(fixed_paths::DEBUG_LOG_FILE);
        let file = std::fs::create_dir_all(&log_dir).and_then(|()| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
        });
        match file {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .json()
                    .with_writer(file)
                    .with_env_filter(
                        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
                            |_| {
                                tracing_subscriber::EnvFilter::new(
                                    "info,crossgrader=debug,crossgrader_ops=debug",
                                )
                            },
                        ),
                    )
                    .init();
                if !json_mode {
                    eprintln!("Debug logging enabled: {}", log_file.display());
                }
                return;
            }
            Err(e) => {
                if !json_mode {
                    eprintln!("Warning: Failed to create log file: {e}");
                }
            }
        }
    }

    if json_mode {
        // JSON mode: keep stderr quiet so stdout stays machine-readable
        tracing_subscriber::fmt()
            .with_writer(std::io::sink)
            .with_env_filter("off")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .init();
    }
}
