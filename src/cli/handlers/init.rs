use crate::cli::commands::InitArgs;
use crate::cli::output::print_json;
use crate::io::vault_io;

/// Create a vault in the working directory (or the `-C` directory).
pub fn cmd_init(args: InitArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let dir = super::start_dir()?;
    let vault = vault_io::init_vault(&dir, args.name.as_deref())?;

    if json {
        print_json(&serde_json::json!({
            "name": vault.config.vault.name,
            "root": vault.root,
            "nodes": vault.nodes_dir(),
        }))?;
    } else {
        println!(
            "initialized vault '{}' at {}",
            vault.config.vault.name,
            vault.root.display()
        );
    }
    Ok(())
}
