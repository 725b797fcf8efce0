use super::{json_pretty, Failure, EXIT_SUCCESS};
use nsm_core::Engine;

fn or_dash(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_owned())
}

pub fn run(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let info = engine.info();
    if json {
        println!("{}", json_pretty(&info)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("nix:");
    for (key, value) in &info.nix {
        println!("  {key:<16} {value}");
    }
    println!("settings:");
    println!("  {:<16} {}", "path", info.settings_path.display());
    println!("  {:<16} {}", "schema_version", or_dash(info.schema_version));
    println!("  {:<16} {}", "channel", or_dash(info.channel));
    println!(
        "  {:<16} {}",
        "pins",
        or_dash(info.pin_count.map(|n| n.to_string()))
    );
    println!("project:");
    println!(
        "  {:<16} {}",
        "descriptor",
        or_dash(info.descriptor.map(|p| p.display().to_string()))
    );
    println!(
        "  {:<16} {}",
        "packages",
        or_dash(info.package_count.map(|n| n.to_string()))
    );
    Ok(EXIT_SUCCESS)
}
