//! Group management commands.

use chrono::Utc;
use clap::{Args, Subcommand};

use splitsync_core::{Group, SyncEngine};

use super::{truncate, OutputFormat};

/// Manage expense-sharing groups
#[derive(Args)]
pub struct GroupCommand {
    #[command(subcommand)]
    pub command: GroupSubcommand,
}

#[derive(Subcommand)]
pub enum GroupSubcommand {
    /// Create a new group
    Create {
        /// Name of the group
        name: String,

        /// ISO-4217 currency code
        #[arg(long, default_value = "EUR")]
        currency: String,

        /// Member names (can be repeated)
        #[arg(long = "member", value_name = "NAME")]
        members: Vec<String>,
    },

    /// List groups
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Include soft-deleted groups
        #[arg(long)]
        all: bool,
    },

    /// Show a group's details
    Show {
        /// Group ID or name
        identifier: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update an existing group
    Update {
        /// Group ID or name
        identifier: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New currency code
        #[arg(long)]
        currency: Option<String>,

        /// Members to add (can be repeated)
        #[arg(long = "add-member", value_name = "NAME")]
        add_members: Vec<String>,

        /// Members to remove (can be repeated)
        #[arg(long = "remove-member", value_name = "NAME")]
        remove_members: Vec<String>,
    },

    /// Delete a group
    Delete {
        /// Group ID or name
        identifier: String,
    },
}

impl GroupSubcommand {
    /// Whether the command writes to the local store.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            GroupSubcommand::Create { .. }
                | GroupSubcommand::Update { .. }
                | GroupSubcommand::Delete { .. }
        )
    }
}

impl GroupCommand {
    pub async fn run(&self, engine: &SyncEngine) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            GroupSubcommand::Create {
                name,
                currency,
                members,
            } => {
                let group = Group::new(name, currency.to_uppercase()).with_members(members.clone());
                engine.insert_entity(&group).await?;

                println!("✓ Group '{}' created", group.name);
                println!("  ID: {}", group.id);
                Ok(())
            }

            GroupSubcommand::List { format, all } => {
                let repo = engine.groups();
                let groups = if *all {
                    repo.list_all().await?
                } else {
                    repo.list().await?
                };

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&groups)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<30}  {:<8}  MEMBERS", "ID", "NAME", "CURRENCY");
                        println!("{}", "-".repeat(90));
                        for group in &groups {
                            println!(
                                "{:<36}  {:<30}  {:<8}  {}",
                                group.id,
                                truncate(&group.name, 30),
                                group.currency,
                                group.members.len()
                            );
                        }
                        println!("\nTotal: {} group(s)", groups.len());
                    }
                }
                Ok(())
            }

            GroupSubcommand::Show { identifier, format } => {
                let group = find_group(engine, identifier).await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&group)?);
                    }
                    OutputFormat::Text => {
                        print!("{}", group);
                        let expenses = engine.expenses().list_by_group(&group.id).await?;
                        println!("Expenses: {}", expenses.len());
                    }
                }
                Ok(())
            }

            GroupSubcommand::Update {
                identifier,
                name,
                currency,
                add_members,
                remove_members,
            } => {
                let mut group = find_group(engine, identifier).await?;
                if let Some(name) = name {
                    group.name = name.clone();
                }
                if let Some(currency) = currency {
                    group.currency = currency.to_uppercase();
                }
                for member in add_members {
                    if !group.members.contains(member) {
                        group.members.push(member.clone());
                    }
                }
                group.members.retain(|m| !remove_members.contains(m));
                group.updated_at = Utc::now();

                engine.update_entity(&group).await?;
                println!("✓ Group '{}' updated", group.name);
                Ok(())
            }

            GroupSubcommand::Delete { identifier } => {
                let group = find_group(engine, identifier).await?;
                engine.delete_entity::<Group>(&group.id).await?;
                println!("✓ Group '{}' deleted", group.name);
                Ok(())
            }
        }
    }
}

/// Looks a group up by ID first, then by name.
pub(crate) async fn find_group(
    engine: &SyncEngine,
    identifier: &str,
) -> Result<Group, Box<dyn std::error::Error>> {
    let repo = engine.groups();
    let group = match repo.get_by_id(identifier).await? {
        Some(group) => Some(group),
        None => repo.get_by_name(identifier).await?,
    };
    group.ok_or_else(|| format!("Group not found: {}", identifier).into())
}
