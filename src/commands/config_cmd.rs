use clap::{Args, Subcommand};

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

fn show_secret(secret: &Option<String>) -> &'static str {
    if secret.is_some() {
        "(set)"
    } else {
        "(not set)"
    }
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!(
                            "database_path: {}",
                            config.database_path.value.display()
                        );
                        println!("  source: {}", config.database_path.source);
                        println!();

                        println!(
                            "remote.url: {}",
                            config.remote.url.as_deref().unwrap_or("(not set)")
                        );
                        println!("remote.api_key: {}", show_secret(&config.remote.api_key));
                        println!(
                            "remote.access_token: {}",
                            show_secret(&config.remote.access_token)
                        );
                        println!();

                        let engine = config.engine_config();
                        println!("engine.flush_interval: {:?}", engine.flush_interval);
                        match engine.reconcile_interval {
                            Some(interval) => {
                                println!("engine.reconcile_interval: {:?}", interval)
                            }
                            None => println!("engine.reconcile_interval: (disabled)"),
                        }
                        println!("engine.request_timeout: {:?}", engine.request_timeout);
                    }
                }
                Ok(())
            }
        }
    }
}
