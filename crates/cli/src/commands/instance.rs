//! `dedalus instance ...` commands.

use crate::cli::{InstanceAction, TargetState};
use crate::client::{ClientError, MasterApiClient, Result};
use crate::commands::graph::pretty;

/// Dispatch an instance subcommand.
///
/// # Errors
///
/// Client failures and unusable local input.
pub async fn run(client: &MasterApiClient, action: InstanceAction) -> Result<()> {
    match action {
        InstanceAction::Info { id, list_all } => {
            let payload = if list_all {
                client.list_instances().await?
            } else {
                let id = id.ok_or_else(|| {
                    ClientError::Input("instance id should be set".to_string())
                })?;
                client.read_instance(&id).await?
            };
            println!("{}", pretty(&payload));
        }
        InstanceAction::Ctrl { id, target_state } => {
            let answer = match target_state {
                TargetState::Start => client.start_instance(&id).await?,
                TargetState::Stop => client.stop_instance(&id).await?,
            };
            println!(
                "State for instance {id} changed from {} to {}.",
                answer["prev_state"].as_str().unwrap_or("?"),
                answer["new_state"].as_str().unwrap_or("?"),
            );
        }
        InstanceAction::Logs {
            id,
            task_name,
            host,
            log_type,
        } => {
            let data = client.instance_logs(&id, &task_name, &host, &log_type).await?;
            print!("{data}");
        }
    }
    Ok(())
}
