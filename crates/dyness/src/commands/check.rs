//! `dyness check`: setup-time validation with one full cycle.

use serde::Serialize;

use chrono::{DateTime, Utc};
use dyness_core::{CommunicationStatus, CyclePhase, DeviceInfo};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::commands::{build_coordinator, spinner};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct CheckReport {
    profile: String,
    device: DeviceInfo,
    communication_status: CommunicationStatus,
    soc_pct: f64,
    last_data_update: DateTime<Utc>,
    session_issued_at: Option<DateTime<Utc>>,
}

fn phase_message(phase: CyclePhase) -> &'static str {
    match phase {
        CyclePhase::Authenticating => "Authenticating",
        CyclePhase::Fetching => "Fetching telemetry (waiting on the request floor)",
        CyclePhase::Normalizing => "Normalizing",
        CyclePhase::Idle | CyclePhase::Published | CyclePhase::Failed => "Finishing",
    }
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let (profile, coordinator) = build_coordinator(global, None)?;

    let bar = spinner("Authenticating", global.quiet);
    let mut phases = coordinator.phase_stream();
    let refresh = coordinator.first_refresh();
    tokio::pin!(refresh);
    let result = loop {
        tokio::select! {
            result = &mut refresh => break result,
            Ok(()) = phases.changed() => {
                bar.set_message(phase_message(*phases.borrow_and_update()));
            }
        }
    };
    bar.finish_and_clear();
    let snapshot = result.map_err(|e| CliError::from(e).for_profile(&profile))?;

    let report = CheckReport {
        profile,
        device: coordinator.device_info(),
        communication_status: coordinator.communication_status(),
        soc_pct: snapshot.soc_pct,
        last_data_update: snapshot.last_data_update,
        session_issued_at: coordinator.diagnostics().session_issued_at,
    };

    let rendered = match global.output {
        OutputFormat::Json => output::render_json(&report, false)?,
        OutputFormat::JsonCompact => output::render_json(&report, true)?,
        OutputFormat::Yaml => output::render_yaml(&report)?,
        OutputFormat::Plain => report.device.bms_serial.clone(),
        OutputFormat::Table => format!(
            "✓ {} (profile '{}', firmware {}, soc {:.1}%)",
            report.device.title(),
            report.profile,
            report.device.firmware_version.as_deref().unwrap_or("unknown"),
            report.soc_pct,
        ),
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}
