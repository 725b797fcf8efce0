use super::{emit, json_pretty, Failure, EXIT_SUCCESS};
use console::style;
use nsm_core::Engine;

pub fn add(engine: &Engine, packages: &[String], json: bool) -> Result<u8, Failure> {
    let outcome = engine.add(packages)?;
    if json {
        println!("{}", json_pretty(&outcome)?);
        return Ok(EXIT_SUCCESS);
    }
    for name in &outcome.added {
        println!("added {name}");
    }
    for name in &outcome.already_present {
        println!("{name} is already present");
    }
    Ok(EXIT_SUCCESS)
}

pub fn remove(engine: &Engine, packages: &[String], json: bool) -> Result<u8, Failure> {
    let outcome = engine.remove(packages)?;
    if json {
        println!("{}", json_pretty(&outcome)?);
        return Ok(EXIT_SUCCESS);
    }
    for name in &outcome.removed {
        println!("removed {name}");
    }
    for name in &outcome.not_found {
        println!("{name} is not in the descriptor");
    }
    Ok(EXIT_SUCCESS)
}

pub fn list(engine: &Engine, status: bool, json: bool) -> Result<u8, Failure> {
    if status {
        return list_with_status(engine, json);
    }
    let packages = engine.list()?;
    let human = if packages.is_empty() {
        "no packages".to_owned()
    } else {
        packages.join("\n")
    };
    emit(json, &serde_json::json!({ "packages": packages }), &human)?;
    Ok(EXIT_SUCCESS)
}

fn list_with_status(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let packages = engine.list_with_status()?;
    if json {
        println!("{}", json_pretty(&serde_json::json!({ "packages": packages }))?);
        return Ok(EXIT_SUCCESS);
    }
    if packages.is_empty() {
        println!("no packages");
        return Ok(EXIT_SUCCESS);
    }
    let width = packages.iter().map(|p| p.name.len()).max().unwrap_or(0);
    for p in &packages {
        let state = match p.installed {
            Some(true) => style("installed").green(),
            Some(false) => style("not in profile").yellow(),
            None => style("unknown").dim(),
        };
        println!("{:<width$}  {state}", p.name);
    }
    Ok(EXIT_SUCCESS)
}
