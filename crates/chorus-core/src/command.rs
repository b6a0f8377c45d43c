//! Parsing of viewer input into conversation or control actions.

/// Leading character that marks input as a command.
pub const COMMAND_MARKER: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Roundtable { topic: String },
    Consensus { question: String },
    Ask { agent: String, question: String },
    SetRole { agent: String, role: String },
    Roles,
    Agents,
    Help,
    Pause,
    Resume,
    Stop,
    Start,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedInput {
    /// Ordinary conversation input.
    Chat(String),
    Command(Command),
    /// A recognized command with missing arguments.
    Usage {
        command: String,
        usage: &'static str,
    },
    /// Marker present, command not recognized.
    Unknown(String),
}

/// (name, usage, description) for every command, in help order.
pub const COMMANDS: &[(&str, &str, &str)] = &[
    (
        "roundtable",
        "/roundtable <topic>",
        "every agent speaks once, in order, on a topic",
    ),
    (
        "consensus",
        "/consensus <question>",
        "every agent states a position, then a summary is posted",
    ),
    (
        "ask",
        "/ask <agent> <question>",
        "ask one agent directly (alias: /focus)",
    ),
    ("role", "/role <agent> <text>", "change an agent's personality"),
    ("roles", "/roles", "list each agent's personality"),
    ("agents", "/agents", "list the agents taking part"),
    ("pause", "/pause", "pause automatic turns"),
    ("resume", "/resume", "resume automatic turns"),
    ("stop", "/stop", "stop the conversation"),
    ("start", "/start", "start the conversation"),
    ("help", "/help", "show this list (alias: /commands)"),
];

pub fn parse(text: &str) -> ParsedInput {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix(COMMAND_MARKER) else {
        return ParsedInput::Chat(trimmed.to_string());
    };

    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };
    let name = name.to_lowercase();

    let usage = |command: &str| ParsedInput::Usage {
        command: command.to_string(),
        usage: usage_for(command),
    };

    match name.as_str() {
        "roundtable" => {
            if rest.is_empty() {
                return usage("roundtable");
            }
            ParsedInput::Command(Command::Roundtable {
                topic: rest.to_string(),
            })
        }
        "consensus" => {
            if rest.is_empty() {
                return usage("consensus");
            }
            ParsedInput::Command(Command::Consensus {
                question: rest.to_string(),
            })
        }
        "ask" | "focus" => match split_agent(rest) {
            Some((agent, question)) => ParsedInput::Command(Command::Ask { agent, question }),
            None => usage("ask"),
        },
        "role" => match split_agent(rest) {
            Some((agent, role)) => ParsedInput::Command(Command::SetRole { agent, role }),
            None => usage("role"),
        },
        "roles" => ParsedInput::Command(Command::Roles),
        "agents" => ParsedInput::Command(Command::Agents),
        "help" | "commands" => ParsedInput::Command(Command::Help),
        "pause" => ParsedInput::Command(Command::Pause),
        "resume" => ParsedInput::Command(Command::Resume),
        "stop" => ParsedInput::Command(Command::Stop),
        "start" => ParsedInput::Command(Command::Start),
        _ => ParsedInput::Unknown(name),
    }
}

/// Split "<agent> <text>", requiring both parts.
fn split_agent(rest: &str) -> Option<(String, String)> {
    let (agent, text) = rest.split_once(char::is_whitespace)?;
    let agent = agent.trim_start_matches('@');
    let text = text.trim();
    if agent.is_empty() || text.is_empty() {
        return None;
    }
    Some((agent.to_string(), text.to_string()))
}

fn usage_for(command: &str) -> &'static str {
    COMMANDS
        .iter()
        .find(|(name, _, _)| *name == command)
        .map(|(_, usage, _)| *usage)
        .unwrap_or("/help")
}

/// Human-readable command list.
pub fn help_text() -> String {
    let mut out = String::from("Available commands:");
    for (_, usage, description) in COMMANDS {
        out.push_str(&format!("\n{usage} - {description}"));
    }
    out
}
