//! Expense commands.

use clap::{Args, Subcommand};
use serde_json::Value;

use splitsync_core::{Expense, SyncEngine};

use super::group::find_group;
use super::{truncate, OutputFormat};

/// Record and inspect expenses
#[derive(Args)]
pub struct ExpenseCommand {
    #[command(subcommand)]
    pub command: ExpenseSubcommand,
}

#[derive(Subcommand)]
pub enum ExpenseSubcommand {
    /// Add an expense to a group
    Add {
        /// Group ID or name
        group: String,

        /// What the expense was for
        title: String,

        /// Who paid
        #[arg(long)]
        payer: String,

        /// Split as a JSON object (e.g. '{"Ana": 12.5, "Ben": 7.5}')
        #[arg(long)]
        split: Option<String>,

        /// Receipt metadata as a JSON object
        #[arg(long)]
        receipt: Option<String>,
    },

    /// List a group's expenses
    List {
        /// Group ID or name
        group: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show an expense's details
    Show {
        /// Expense ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete an expense
    Delete {
        /// Expense ID
        id: String,
    },
}

impl ExpenseSubcommand {
    /// Whether the command writes to the local store.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ExpenseSubcommand::Add { .. } | ExpenseSubcommand::Delete { .. }
        )
    }
}

fn parse_json(flag: &str, raw: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| format!("Invalid JSON for --{}: {}", flag, e))?;
    if !value.is_object() {
        return Err(format!("--{} must be a JSON object", flag).into());
    }
    Ok(value)
}

impl ExpenseCommand {
    pub async fn run(&self, engine: &SyncEngine) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ExpenseSubcommand::Add {
                group,
                title,
                payer,
                split,
                receipt,
            } => {
                let group = find_group(engine, group).await?;

                let mut expense = Expense::new(&group.id, title, payer);
                if let Some(split) = split {
                    expense = expense.with_split(parse_json("split", split)?);
                }
                if let Some(receipt) = receipt {
                    expense = expense.with_receipt(parse_json("receipt", receipt)?);
                }
                engine.insert_entity(&expense).await?;

                println!("✓ Expense '{}' added to '{}'", expense.title, group.name);
                println!("  ID: {}", expense.id);
                Ok(())
            }

            ExpenseSubcommand::List { group, format } => {
                let group = find_group(engine, group).await?;
                let expenses = engine.expenses().list_by_group(&group.id).await?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&expenses)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<16}  {:<30}  PAID BY", "ID", "DATE", "TITLE");
                        println!("{}", "-".repeat(100));
                        for expense in &expenses {
                            println!(
                                "{:<36}  {:<16}  {:<30}  {}",
                                expense.id,
                                expense.created_at.format("%Y-%m-%d %H:%M"),
                                truncate(&expense.title, 30),
                                expense.payer_name
                            );
                        }
                        println!("\nTotal: {} expense(s)", expenses.len());
                    }
                }
                Ok(())
            }

            ExpenseSubcommand::Show { id, format } => {
                let expense = engine
                    .expenses()
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| format!("Expense not found: {}", id))?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&expense)?);
                    }
                    OutputFormat::Text => {
                        print!("{}", expense);
                    }
                }
                Ok(())
            }

            ExpenseSubcommand::Delete { id } => {
                engine.delete_entity::<Expense>(id).await?;
                println!("✓ Expense {} deleted", id);
                Ok(())
            }
        }
    }
}
