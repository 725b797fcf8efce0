use super::{emit, Failure, EXIT_SUCCESS};
use nsm_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let flake = engine.convert()?;
    let packages = flake.list()?;
    emit(
        json,
        &serde_json::json!({
            "status": "converted",
            "path": flake.path(),
            "packages": packages,
        }),
        &format!(
            "wrote {} with {} package(s); shell.nix was left in place",
            flake.path().display(),
            packages.len()
        ),
    )?;
    Ok(EXIT_SUCCESS)
}
