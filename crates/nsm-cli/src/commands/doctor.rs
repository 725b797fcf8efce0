use super::{colorize_status, json_pretty, Failure, EXIT_FAILURE, EXIT_SUCCESS};
use nsm_core::{DiagnosticResult, DiagnosticStatus, Doctor, Engine, FixReport};

pub fn run(engine: &Engine, fix: bool, json: bool) -> Result<u8, Failure> {
    let doctor = Doctor::default();
    let mut results = engine.diagnose(&doctor);
    let mut report = None;
    if fix {
        let applied = engine.fix(&doctor, &results);
        if !applied.applied.is_empty() {
            results = engine.diagnose(&doctor);
        }
        report = Some(applied);
    }

    let healthy = results
        .iter()
        .all(|r| r.status != DiagnosticStatus::Error);

    if json {
        let payload = serde_json::json!({
            "healthy": healthy,
            "checks": results,
            "fixes": report,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        print_human(&results, report.as_ref(), healthy);
    }
    Ok(if healthy { EXIT_SUCCESS } else { EXIT_FAILURE })
}

fn icon(status: DiagnosticStatus) -> &'static str {
    match status {
        DiagnosticStatus::Ok => "✓",
        DiagnosticStatus::Warning => "⚠",
        DiagnosticStatus::Error => "✗",
        DiagnosticStatus::Unknown => "?",
    }
}

fn print_human(results: &[DiagnosticResult], report: Option<&FixReport>, healthy: bool) {
    println!("NSM Doctor\n");
    for r in results {
        println!(
            "  {} {:<18} {:<8} {}",
            icon(r.status),
            r.name,
            colorize_status(r.status),
            r.message
        );
        if r.status != DiagnosticStatus::Ok {
            if let Some(fix) = &r.fix {
                println!("      fix: {fix}");
            }
        }
    }
    if let Some(report) = report {
        println!();
        for done in &report.applied {
            println!("  fixed: {done}");
        }
        for failed in &report.failed {
            println!("  fix failed: {failed}");
        }
        for hint in &report.manual {
            println!("  manual: {hint}");
        }
    }
    println!();
    if healthy {
        println!("No errors found.");
    } else {
        println!("Some checks failed. See above for details.");
    }
}
