//! Demonstrates the persistent `Client` façade: two prompts over the
//! same session, with the second sent only after the first turn's
//! `ResultMessage` boundary.
//!
//! Usage:
//! - `AGENT_CLI_BINARY=/path/to/agent cargo run -p agent_cli_core --example persistent_client`

use std::collections::BTreeMap;
use std::env;
use std::error::Error;
use std::path::PathBuf;

use agent_cli_core::{AgentOptions, Client, ProcessSpec};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let binary = env::var("AGENT_CLI_BINARY").map(PathBuf::from)?;
    let process = ProcessSpec {
        executable: binary,
        argv: Vec::new(),
        working_dir: None,
        env: BTreeMap::new(),
    };

    let mut client = Client::new();
    client.connect(process, &AgentOptions::default()).await?;

    for prompt in ["what files are in this directory?", "summarize that in one line"] {
        client.query(prompt).await?;
        loop {
            match client.receive_messages().await {
                Some(Ok(message)) => {
                    let is_result = message.is_result();
                    println!("{}", serde_json::to_string(&message)?);
                    if is_result {
                        break;
                    }
                }
                Some(Err(err)) => {
                    eprintln!("error: {err}");
                    break;
                }
                None => break,
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}
