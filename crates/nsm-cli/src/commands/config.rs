use super::{emit, json_pretty, Failure, EXIT_SUCCESS};
use nsm_core::{CoreError, Engine, SettingKey};

pub fn get(engine: &Engine, key: SettingKey, json: bool) -> Result<u8, Failure> {
    let value = engine.settings().get(key).map_err(CoreError::from)?;
    emit(
        json,
        &serde_json::json!({ "key": key.as_str(), "value": value }),
        &value,
    )?;
    Ok(EXIT_SUCCESS)
}

pub fn set(engine: &Engine, key: SettingKey, value: &str, json: bool) -> Result<u8, Failure> {
    engine
        .settings()
        .set(key, value)
        .map_err(CoreError::from)?;
    let stored = engine.settings().get(key).map_err(CoreError::from)?;
    emit(
        json,
        &serde_json::json!({ "key": key.as_str(), "value": stored }),
        &format!("{key} = {stored}"),
    )?;
    Ok(EXIT_SUCCESS)
}

pub fn show(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let doc = engine.settings().load().map_err(CoreError::from)?;
    if json {
        println!("{}", json_pretty(&doc)?);
    } else {
        println!("# {}", engine.settings().path().display());
        print!("{}", doc.to_toml().map_err(CoreError::from)?);
    }
    Ok(EXIT_SUCCESS)
}

pub fn reset(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let (_, backup) = engine.settings().reset().map_err(CoreError::from)?;
    let path = engine.settings().path();
    let human = match &backup {
        Some(b) => format!(
            "reset {} to defaults; previous content saved to {}",
            path.display(),
            b.display()
        ),
        None => format!("wrote default settings to {}", path.display()),
    };
    emit(
        json,
        &serde_json::json!({ "status": "reset", "path": path, "backup": backup }),
        &human,
    )?;
    Ok(EXIT_SUCCESS)
}
