//! Test-only fake agent binary (§8 "a tiny helper ... Rust binary"),
//! grounded on `codex/src/tests/support.rs::write_executable`'s
//! scripted-binary pattern. Takes one argument, a path to a file of
//! newline-delimited JSON envelopes to print to stdout; concurrently
//! answers any `control_request` line it reads on stdin with a trivial
//! success `control_response`, so `ControlProtocol::initialize` (and
//! other outbound requests) round-trip in integration tests without a
//! real agent CLI.
//!
//! Set `FAKE_AGENT_IGNORE_SIGTERM=1` to exercise the transport's
//! SIGTERM-then-SIGKILL termination path (§4.C). Set
//! `FAKE_AGENT_EXIT_CODE=<n>` to exit with status `n` after the script
//! finishes, exercising `AgentError::Process` (§7).

use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

fn main() {
    let script_path = env::args().nth(1).expect("usage: fake_agent <script-file>");
    let script = fs::read_to_string(&script_path).expect("read script file");

    let ignore_sigterm = env::var("FAKE_AGENT_IGNORE_SIGTERM").as_deref() == Ok("1");
    #[cfg(unix)]
    if ignore_sigterm {
        unsafe {
            libc::signal(libc::SIGTERM, libc::SIG_IGN);
        }
    }

    thread::spawn(answer_control_requests);
    eprintln!("fake_agent: started");

    for line in script.lines() {
        println!("{line}");
        io::stdout().flush().ok();
        thread::sleep(Duration::from_millis(5));
    }

    if ignore_sigterm {
        thread::sleep(Duration::from_secs(30));
    }

    if let Ok(code) = env::var("FAKE_AGENT_EXIT_CODE") {
        let code: i32 = code.parse().expect("FAKE_AGENT_EXIT_CODE must be an integer");
        std::process::exit(code);
    }
}

fn answer_control_requests() {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        if value.get("type").and_then(|t| t.as_str()) != Some("control_request") {
            continue;
        }
        let request_id = value
            .get("request_id")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let response = serde_json::json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": request_id,
                "response": {},
            },
        });
        println!("{response}");
        io::stdout().flush().ok();
    }
}
