//! Interactive commands read from stdin.

/// One line of operator input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostCommand {
    /// Print connection status and counters.
    Status,
    /// Start the client if it is not running.
    Start,
    /// Reconnect now with a fresh session.
    Reload,
    /// Persist a new identity code and reload.
    SetId(String),
    /// Print the command list.
    Help,
    /// Close the client and exit.
    Quit,
}

/// Help text for the interactive prompt.
pub const HELP: &str = "commands: status | start | reload | setid <code> | help | quit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<HostCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match (verb.to_ascii_lowercase().as_str(), rest.as_slice()) {
        ("status", []) => HostCommand::Status,
        ("start", []) => HostCommand::Start,
        ("reload", []) => HostCommand::Reload,
        ("setid", [code]) => HostCommand::SetId((*code).to_string()),
        ("setid", _) => return Err("usage: setid <code>".to_string()),
        ("help" | "?", _) => HostCommand::Help,
        ("quit" | "exit" | "stop", []) => HostCommand::Quit,
        (other, _) => return Err(format!("unknown command `{other}`; {HELP}")),
    };
    Ok(Some(command))
}
