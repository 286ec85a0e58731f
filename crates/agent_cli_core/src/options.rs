//! `AgentOptions` and its builder (§4.F: options shared by `Query` and
//! `Client`). Grounded on `claude_code/src/builder/mod.rs`'s
//! consuming-builder idiom (`self -> Self` chain, `build()` produces
//! the owned value), generalized with the fields this crate's richer
//! session model needs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::hooks::{HookRegistration, HookRegistry, PermissionCallback};
use crate::mcp::{McpMessageHandler, McpServerConfig};

/// Per-line stderr callback; invoked with the right-trimmed line.
pub type StderrCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct AgentOptions {
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub extra_dirs: Vec<PathBuf>,
    pub extra_env: BTreeMap<String, String>,
    pub extra_argv: Vec<String>,
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    pub mcp_handlers: BTreeMap<String, McpMessageHandler>,
    pub hooks: HookRegistry,
    pub permission_callback: Option<PermissionCallback>,
    pub stderr_callback: Option<StderrCallback>,
    pub stderr_writer: Option<Arc<std::sync::Mutex<dyn std::io::Write + Send>>>,
    pub debug_writer: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub enable_file_checkpointing: bool,
}

impl std::fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOptions")
            .field("allowed_tools", &self.allowed_tools)
            .field("disallowed_tools", &self.disallowed_tools)
            .field("system_prompt", &self.system_prompt)
            .field("model", &self.model)
            .field("permission_mode", &self.permission_mode)
            .field("working_dir", &self.working_dir)
            .field("extra_dirs", &self.extra_dirs)
            .field("extra_env", &self.extra_env)
            .field("extra_argv", &self.extra_argv)
            .field("mcp_servers", &self.mcp_servers)
            .field("has_permission_callback", &self.permission_callback.is_some())
            .field("has_stderr_callback", &self.stderr_callback.is_some())
            .field("enable_file_checkpointing", &self.enable_file_checkpointing)
            .finish_non_exhaustive()
    }
}

impl AgentOptions {
    pub fn builder() -> AgentOptionsBuilder {
        AgentOptionsBuilder::default()
    }
}

#[derive(Clone, Default)]
pub struct AgentOptionsBuilder {
    inner: AgentOptions,
}

impl AgentOptionsBuilder {
    pub fn allowed_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inner.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn disallowed_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inner.disallowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.inner.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.inner.model = Some(model.into());
        self
    }

    pub fn permission_mode(mut self, mode: impl Into<String>) -> Self {
        self.inner.permission_mode = Some(mode.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.inner.working_dir = Some(dir.into());
        self
    }

    pub fn extra_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.inner.extra_dirs.push(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.extra_env.insert(key.into(), value.into());
        self
    }

    pub fn argv_flag(mut self, flag: impl Into<String>) -> Self {
        self.inner.extra_argv.push(flag.into());
        self
    }

    pub fn mcp_server(mut self, name: impl Into<String>, config: McpServerConfig) -> Self {
        self.inner.mcp_servers.insert(name.into(), config);
        self
    }

    pub fn mcp_handler(mut self, name: impl Into<String>, handler: McpMessageHandler) -> Self {
        self.inner.mcp_handlers.insert(name.into(), handler);
        self
    }

    pub fn hook(mut self, registration: HookRegistration) -> Self {
        self.inner.hooks.register(registration);
        self
    }

    pub fn permission_callback(mut self, callback: PermissionCallback) -> Self {
        self.inner.permission_callback = Some(callback);
        self
    }

    pub fn stderr_callback(mut self, callback: StderrCallback) -> Self {
        self.inner.stderr_callback = Some(callback);
        self
    }

    pub fn stderr_writer(mut self, writer: Arc<std::sync::Mutex<dyn std::io::Write + Send>>) -> Self {
        self.inner.stderr_writer = Some(writer);
        self
    }

    pub fn debug_writer(mut self, writer: Arc<dyn Fn(&str) + Send + Sync>) -> Self {
        self.inner.debug_writer = Some(writer);
        self
    }

    pub fn enable_file_checkpointing(mut self, enabled: bool) -> Self {
        self.inner.enable_file_checkpointing = enabled;
        self
    }

    pub fn build(self) -> AgentOptions {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_fields() {
        let options = AgentOptions::builder()
            .allowed_tools(["Bash", "Write"])
            .model("claude-test")
            .env("FOO", "bar")
            .mcp_server(
                "local",
                McpServerConfig::Sdk {
                    name: "local".to_string(),
                },
            )
            .build();

        assert_eq!(options.allowed_tools, vec!["Bash", "Write"]);
        assert_eq!(options.model.as_deref(), Some("claude-test"));
        assert_eq!(options.extra_env.get("FOO").map(String::as_str), Some("bar"));
        assert!(options.mcp_servers.contains_key("local"));
    }
}
