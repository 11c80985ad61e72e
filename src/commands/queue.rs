use clap::Args;

use splitsync_core::SyncEngine;

use super::OutputFormat;

/// Show local changes waiting to be pushed
#[derive(Args)]
pub struct QueueCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl QueueCommand {
    pub async fn run(&self, engine: &SyncEngine) -> Result<(), Box<dyn std::error::Error>> {
        let operations = engine.pending_operations().await?;

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&operations)?);
            }
            OutputFormat::Text => {
                if operations.is_empty() {
                    println!("Queue is empty; all local changes have been pushed.");
                    return Ok(());
                }

                println!("{:<28}  {:<7}  {:<9}  ENTITY", "QUEUED AT", "OP", "TABLE");
                println!("{}", "-".repeat(90));
                for op in &operations {
                    println!(
                        "{:<28}  {:<7}  {:<9}  {}",
                        op.created_at, op.operation_type, op.entity_table, op.entity_id
                    );
                }
                println!("\nPending: {} operation(s)", operations.len());
            }
        }
        Ok(())
    }
}
