use super::{emit, json_pretty, run_with_spinner, Failure, EXIT_SUCCESS};
use nsm_core::Engine;

pub fn clean(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let report = run_with_spinner(json, "collecting garbage", "garbage collected", || {
        engine.clean()
    })?;
    let human = if report.summary.is_empty() {
        "nothing to collect".to_owned()
    } else {
        report.summary.clone()
    };
    emit(json, &serde_json::json!({ "summary": report.summary }), &human)?;
    Ok(EXIT_SUCCESS)
}

pub fn upgrade(engine: &Engine, json: bool) -> Result<u8, Failure> {
    run_with_spinner(json, "updating channels", "channels updated", || {
        engine.upgrade()
    })?;
    if json {
        println!("{}", json_pretty(&serde_json::json!({ "status": "updated" }))?);
    }
    Ok(EXIT_SUCCESS)
}
