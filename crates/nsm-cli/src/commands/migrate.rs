use super::{emit, Failure, EXIT_SUCCESS};
use nsm_core::{Engine, CURRENT_SCHEMA};

pub fn run(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let path = engine.settings().path();
    if !engine.settings().exists() {
        emit(
            json,
            &serde_json::json!({ "status": "no_settings", "path": path }),
            &format!(
                "No settings file at {}. Nothing to migrate.",
                path.display()
            ),
        )?;
        return Ok(EXIT_SUCCESS);
    }

    match engine.migrate()? {
        None => emit(
            json,
            &serde_json::json!({ "status": "current", "schema_version": CURRENT_SCHEMA }),
            &format!("Settings schema: {CURRENT_SCHEMA} (current)\nNo migration needed."),
        )?,
        Some(m) => {
            let steps: Vec<String> = m.steps.iter().map(ToString::to_string).collect();
            let from = m
                .from
                .map_or_else(|| "unversioned".to_owned(), |v| v.to_string());
            let mut human = if steps.is_empty() {
                format!("Settings schema: {} (current)", m.to)
            } else {
                format!("Migrated settings from {from} to {}.", m.to)
            };
            for step in &steps {
                human.push_str(&format!("\n  {step}"));
            }
            if !m.filled.is_empty() {
                human.push_str(&format!("\nFilled missing fields: {}", m.filled.join(", ")));
            }
            if let Some(backup) = &m.backup_path {
                human.push_str(&format!("\nBackup: {}", backup.display()));
            }
            emit(
                json,
                &serde_json::json!({
                    "status": "migrated",
                    "from": m.from,
                    "to": m.to,
                    "steps": steps,
                    "filled": m.filled,
                    "backup": m.backup_path,
                }),
                &human,
            )?;
        }
    }
    Ok(EXIT_SUCCESS)
}
