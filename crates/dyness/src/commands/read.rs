//! `dyness read`: one cycle, then print the metrics.

use crate::cli::{GlobalOpts, ReadArgs};
use crate::commands::{build_coordinator, spinner};
use crate::error::CliError;
use crate::output::{self, ReadingView};

pub async fn handle(args: &ReadArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (profile, coordinator) = build_coordinator(global, None)?;

    let bar = spinner("Reading battery", global.quiet);
    let result = coordinator.first_refresh().await;
    bar.finish_and_clear();
    result.map_err(|e| CliError::from(e).for_profile(&profile))?;

    let view = ReadingView::new(&coordinator.reading(), coordinator.device_info(), &args.metrics);
    let rendered = output::render_reading(global.output, &view, output::should_color(global.color))?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
