//! Configuration view and validation commands: `delve config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use delve::delve_config::{CONFIG_FILE, DELVE_DIR, DelveConfig, DelveToml};

    let delve_dir = project_dir.join(DELVE_DIR);
    let config_path = delve_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Delve Configuration");
            println!("===================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                DelveToml::load(&config_path)?
            } else {
                println!("No delve.toml found at {}", config_path.display());
                println!("Using default configuration.");
                DelveToml::default()
            };
            println!();
            print_toml(&toml);

            println!("Effective values (with env overrides):");
            let config = DelveConfig::new(project_dir.to_path_buf())?;
            println!(
                "  max_iterations = {}",
                config.toml.supervisor.max_iterations
            );
            println!("  ledger_mode = \"{}\"", config.toml.supervisor.ledger_mode);
            println!("  log level = \"{}\"", config.toml.logging.level);
            println!();

            if !config_path.exists() {
                println!("Run 'delve config init' to create a delve.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No delve.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = DelveToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("delve.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            DelveToml::default().save(&config_path)?;

            println!("Created delve.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [supervisor] max_iterations, max_parallel, ledger_mode");
            println!("  - [stream] flush_interval_ms, reorder_window");
            println!("  - [logging] level, json, file");
            println!();
        }
    }

    Ok(())
}

fn print_toml(toml: &delve::delve_config::DelveToml) {
    println!("[supervisor]");
    println!("  max_iterations = {}", toml.supervisor.max_iterations);
    println!("  max_parallel = {}", toml.supervisor.max_parallel);
    println!("  ledger_mode = \"{}\"", toml.supervisor.ledger_mode);
    println!();
    println!("[stream]");
    println!("  flush_interval_ms = {}", toml.stream.flush_interval_ms);
    println!("  reorder_window = {}", toml.stream.reorder_window);
    println!();
    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  json = {}", toml.logging.json);
    println!("  file = {}", toml.logging.file);
    println!();
}
