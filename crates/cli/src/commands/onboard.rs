//! `docuagent onboard` — First-time setup.

use docuagent_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("DocuAgent — First-Time Setup");
    println!("============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("Created config directory: {}", config_dir.display());
    } else {
        println!("Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("Config file already exists: {}", config_path.display());
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("Created config file: {}", config_path.display());
    }

    println!();
    println!("Next steps:");
    println!("  1. Edit {} to point at your backend", config_path.display());
    println!("     (defaults to Ollama at http://localhost:11434/v1)");
    println!("  2. For OpenAI, set provider = \"openai\" and export DOCUAGENT_API_KEY");
    println!("  3. Try it: docuagent ask \"What is the retry policy?\"");

    Ok(())
}
