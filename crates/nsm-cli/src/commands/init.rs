use super::{emit, Failure, EXIT_SUCCESS};
use nsm_core::Engine;
use nsm_schema::Dialect;

pub fn run(
    engine: &Engine,
    dialect: Option<Dialect>,
    packages: &[String],
    json: bool,
) -> Result<u8, Failure> {
    let descriptor = engine.init(dialect, packages)?;
    let listed = descriptor.list()?;
    emit(
        json,
        &serde_json::json!({
            "status": "created",
            "path": descriptor.path(),
            "format": descriptor.dialect(),
            "packages": listed,
        }),
        &format!(
            "created {} with {} package(s)",
            descriptor.path().display(),
            listed.len()
        ),
    )?;
    Ok(EXIT_SUCCESS)
}
