//! `dedalus graph ...` commands.

use std::io::Read;
use std::path::PathBuf;

use serde_json::{Value, json};

use crate::cli::{GraphAction, GraphFormat};
use crate::client::{ClientError, MasterApiClient, Result};

/// Dispatch a graph subcommand.
///
/// # Errors
///
/// Client failures and unusable local input.
pub async fn run(client: &MasterApiClient, action: GraphAction) -> Result<()> {
    match action {
        GraphAction::Create {
            name,
            graph,
            hosts,
            format,
        } => {
            let input = read_input(graph.as_ref())?;
            let body = prepare_graph_struct(&name, &input, &hosts, format)?;
            let created = client.create_graph(&name, &body).await?;
            println!(
                "Created graph \"{}\", revision {}.",
                created["graph_name"].as_str().unwrap_or(&name),
                created["revision"]
            );
        }
        GraphAction::Info {
            name,
            revision,
            list_all,
        } => {
            let payload = if list_all {
                client.list_graphs(name.as_deref()).await?
            } else {
                let name = name.ok_or_else(|| {
                    ClientError::Input("graph name should be set".to_string())
                })?;
                client.read_graph(&name, revision).await?
            };
            println!("{}", pretty(&payload));
        }
        GraphAction::Launch { name, revision } => {
            let instance = client.launch_graph(&name, revision).await?;
            println!(
                "Created new graph instance: {}",
                instance["instance_id"].as_str().unwrap_or_default()
            );
        }
        GraphAction::Schedule { name, rule } => {
            let schedule = client.schedule_graph(&name, &rule).await?;
            println!(
                "Scheduled graph \"{name}\" with rule \"{}\".",
                schedule["schedule"].as_str().unwrap_or(&rule)
            );
        }
    }
    Ok(())
}

fn read_input(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path).map_err(|err| {
            ClientError::Input(format!("reading {}: {err}", path.display()))
        }),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .map_err(|err| ClientError::Input(format!("reading stdin: {err}")))?;
            Ok(input)
        }
    }
}

/// Build the GraphStruct document to post: raw input verbatim, or a shell
/// script wrapped into a one-task graph on cluster `I`.
fn prepare_graph_struct(
    name: &str,
    input: &str,
    hosts: &[String],
    format: GraphFormat,
) -> Result<Value> {
    match format {
        GraphFormat::Raw => serde_json::from_str(input)
            .map_err(|err| ClientError::Input(format!("input is not valid JSON: {err}"))),
        GraphFormat::Script => {
            if hosts.is_empty() {
                return Err(ClientError::Input(
                    "script graphs need at least one host".to_string(),
                ));
            }
            Ok(json!({
                "graph_name": name,
                "clusters": { "I": hosts },
                "tasks": [
                    {
                        "task_name": "main",
                        "task_struct": {
                            "executor": {
                                "name": "shell",
                                "config": { "command": ["sh", "-c", input] }
                            }
                        },
                        "hosts": ["I"]
                    }
                ],
                "deps": {}
            }))
        }
    }
}

pub(crate) fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
