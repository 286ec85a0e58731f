//! Demonstrates the one-shot `Query` façade against a resolved agent
//! binary.
//!
//! Usage:
//! - `AGENT_CLI_BINARY=/path/to/agent cargo run -p agent_cli_core --example one_shot_query -- "say hello"`

use std::collections::BTreeMap;
use std::env;
use std::error::Error;
use std::path::PathBuf;

use agent_cli_core::query::query;
use agent_cli_core::{AgentOptions, ProcessSpec};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let binary = env::var("AGENT_CLI_BINARY").map(PathBuf::from)?;
    let prompt = env::args().nth(1).unwrap_or_else(|| "hello".to_string());

    let process = ProcessSpec {
        executable: binary,
        argv: Vec::new(),
        working_dir: None,
        env: BTreeMap::new(),
    };
    let options = AgentOptions::builder().model("claude-default").build();

    let mut response = query(prompt, process, options).await?;
    while let Ok(message) = response.next().await {
        let is_result = message.is_result();
        println!("{}", serde_json::to_string(&message)?);
        if is_result {
            break;
        }
    }
    response.close().await?;
    Ok(())
}
