pub mod completions;
pub mod config;
pub mod convert;
pub mod doctor;
pub mod info;
pub mod init;
pub mod maintenance;
pub mod migrate;
pub mod packages;
pub mod pin;

use indicatif::{ProgressBar, ProgressStyle};
use nsm_core::{CoreError, DiagnosticStatus};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DESCRIPTOR_ERROR: u8 = 2;
pub const EXIT_SETTINGS_ERROR: u8 = 3;

/// A command error with the exit code it maps to.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl Failure {
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub fn exit_code_for(err: &CoreError) -> u8 {
    match err {
        CoreError::NoDescriptor(_)
        | CoreError::DescriptorExists(_)
        | CoreError::Descriptor(_)
        | CoreError::InvalidPackage { .. } => EXIT_DESCRIPTOR_ERROR,
        CoreError::Settings(_) | CoreError::InvalidVersion { .. } => EXIT_SETTINGS_ERROR,
        CoreError::Store(_) | CoreError::Toolchain(_) => EXIT_FAILURE,
    }
}

impl From<CoreError> for Failure {
    fn from(err: CoreError) -> Self {
        Self::new(exit_code_for(&err), err.to_string())
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::new(EXIT_FAILURE, message)
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Print `json` or `human` depending on the output mode.
pub fn emit(json_output: bool, json: &serde_json::Value, human: &str) -> Result<(), String> {
    if json_output {
        println!("{}", json_pretty(json)?);
    } else {
        println!("{human}");
    }
    Ok(())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

pub fn colorize_status(status: DiagnosticStatus) -> String {
    use console::Style;
    let style = match status {
        DiagnosticStatus::Ok => Style::new().green(),
        DiagnosticStatus::Warning => Style::new().yellow(),
        DiagnosticStatus::Error => Style::new().red().bold(),
        DiagnosticStatus::Unknown => Style::new().dim(),
    };
    style.apply_to(status.as_str()).to_string()
}

/// Spinner only for human output; JSON consumers read stdout.
pub fn run_with_spinner<T>(
    json: bool,
    msg: &str,
    done: &str,
    op: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, Failure> {
    if json {
        return op().map_err(Failure::from);
    }
    let pb = spinner(msg);
    match op() {
        Ok(value) => {
            spin_ok(&pb, done);
            Ok(value)
        }
        Err(e) => {
            spin_fail(&pb, msg);
            Err(e.into())
        }
    }
}
