//! `dyness watch`: run the coordinator and print every published snapshot.

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;

use dyness_core::{Coordinator, Diagnostics};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::commands::build_coordinator;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: &WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (profile, coordinator) = build_coordinator(global, args.interval)?;

    // Subscribe before starting so the first publish is not missed.
    let mut snapshots = coordinator.subscribe();
    let mut diagnostics = coordinator.diagnostics_stream();
    coordinator.start().await;

    if !global.quiet {
        eprintln!(
            "Watching {} every {} (Ctrl-C to stop)",
            coordinator.device_info().title(),
            humantime::format_duration(coordinator.config().poll_interval),
        );
    }

    let color = output::should_color(global.color);
    let mut last_error_at: Option<DateTime<Utc>> = None;
    let mut published: u64 = 0;

    let result: Result<(), CliError> = async {
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    return Ok(());
                }
                snapshot = snapshots.recv() => {
                    let Some(snapshot) = snapshot else {
                        return Ok(());
                    };
                    let line = output::render_snapshot_line(
                        global.output,
                        &snapshot,
                        coordinator.communication_status(),
                        color,
                    )?;
                    output::print_output(&line, global.quiet);
                    published += 1;
                    if args.count.is_some_and(|n| published >= n) {
                        return Ok(());
                    }
                }
                changed = diagnostics.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    let current = diagnostics.borrow_and_update().clone();
                    if !global.quiet {
                        report_failure(&coordinator, &current, &profile, &mut last_error_at, color);
                    }
                }
            }
        }
    }
    .await;

    coordinator.shutdown().await;
    result
}

/// Print a cycle failure once, with the delay until the next attempt.
fn report_failure(
    coordinator: &Coordinator,
    diagnostics: &Diagnostics,
    profile: &str,
    last_error_at: &mut Option<DateTime<Utc>>,
    color: bool,
) {
    let Some(ref error) = diagnostics.last_error else {
        return;
    };
    if *last_error_at == Some(error.at) {
        return;
    }
    *last_error_at = Some(error.at);

    let retry = humantime::format_duration(coordinator.next_delay());
    let line = if diagnostics.cannot_connect {
        format!(
            "credentials rejected for profile '{profile}': {} (retry in {retry})",
            error.message
        )
    } else {
        format!(
            "cycle failed [{}], {} consecutive: {} (retry in {retry})",
            error.kind, diagnostics.consecutive_failures, error.message
        )
    };
    if color {
        eprintln!("{}", line.yellow());
    } else {
        eprintln!("{line}");
    }
}
