use super::{emit, json_pretty, run_with_spinner, Failure, EXIT_SUCCESS};
use nsm_core::Engine;

pub fn pin(
    engine: &Engine,
    package: &str,
    version: Option<&str>,
    json: bool,
) -> Result<u8, Failure> {
    let pinned = if version.is_some() {
        engine.pin(package, version)?
    } else {
        run_with_spinner(
            json,
            &format!("looking up {package}"),
            &format!("found {package}"),
            || engine.pin(package, None),
        )?
    };
    emit(
        json,
        &serde_json::json!({ "package": package, "version": pinned }),
        &format!("pinned {package} to {pinned}"),
    )?;
    Ok(EXIT_SUCCESS)
}

pub fn unpin(engine: &Engine, package: &str, json: bool) -> Result<u8, Failure> {
    let was = engine.unpin(package)?;
    emit(
        json,
        &serde_json::json!({ "package": package, "unpinned": was }),
        &format!("unpinned {package} (was {was})"),
    )?;
    Ok(EXIT_SUCCESS)
}

pub fn list(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let pins = engine.pins()?;
    if json {
        println!("{}", json_pretty(&pins)?);
    } else if pins.is_empty() {
        println!("no pinned packages");
    } else {
        let width = pins.keys().map(String::len).max().unwrap_or(0);
        for (name, version) in &pins {
            println!("{name:<width$}  {version}");
        }
    }
    Ok(EXIT_SUCCESS)
}
