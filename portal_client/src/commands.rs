use std::fmt;

/// A command typed into the portal shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Login { email: String, password: String },
    Register {
        email: String,
        password: String,
        confirm_password: String,
        full_name: String,
    },
    WhoAmI,
    Refresh,
    Impersonate(String),
    StopImpersonation,
    /// Reconcile impersonation state with the server
    Sync,
    Status,
    Open(String),
    Extend,
    Logout,
    Help,
    Quit,
}

/// Errors that can occur during command parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Command is missing required arguments.
    MissingArguments { command: &'static str, usage: &'static str },
    /// Unrecognized command.
    UnrecognizedCommand(String),
    /// Blank input.
    Empty,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingArguments { command, usage } => {
                write!(f, "'{}' is missing arguments. Usage: {}", command, usage)
            }
            Self::UnrecognizedCommand(cmd) => write!(
                f,
                "Unrecognized command '{}'. Type 'help' to see available commands",
                cmd
            ),
            Self::Empty => write!(f, "Type 'help' to see available commands"),
        }
    }
}

impl std::error::Error for ParseError {}

pub const HELP_TEXT: &str = "\
Commands:
  login EMAIL PASSWORD                          Sign in
  register EMAIL PASSWORD CONFIRM FULL NAME     Create an account and sign in
  whoami                                        Show the signed-in identity
  refresh                                       Re-fetch the profile
  impersonate UUID                              View the portal as another user (admins)
  stop-impersonation                            Return to your admin account
  sync                                          Reconcile impersonation with the server
  status                                        Show session and timeout state
  open PATH                                     Navigate, subject to route guards
  extend                                        Keep the session alive
  logout                                        Sign out now
  quit                                          Exit
";

const LOGIN_USAGE: &str = "login EMAIL PASSWORD";
const REGISTER_USAGE: &str = "register EMAIL PASSWORD CONFIRM FULL NAME";
const IMPERSONATE_USAGE: &str = "impersonate UUID";
const OPEN_USAGE: &str = "open PATH";

/// Parse a shell line into a [`ShellCommand`].
///
/// # Examples
///
/// ```
/// use portal_client::commands::{ShellCommand, parse_command};
///
/// assert_eq!(parse_command("whoami"), Ok(ShellCommand::WhoAmI));
/// assert_eq!(
///     parse_command("open /admin/users"),
///     Ok(ShellCommand::Open("/admin/users".to_string()))
/// );
/// ```
pub fn parse_command(input: &str) -> Result<ShellCommand, ParseError> {
    let trimmed = input.trim();
    let parts: Vec<&str> = trimmed.split_ascii_whitespace().collect();

    let Some(&command) = parts.first() else {
        return Err(ParseError::Empty);
    };

    match (command, parts.len()) {
        ("whoami", 1) => return Ok(ShellCommand::WhoAmI),
        ("refresh", 1) => return Ok(ShellCommand::Refresh),
        ("stop-impersonation" | "stop", 1) => return Ok(ShellCommand::StopImpersonation),
        ("sync", 1) => return Ok(ShellCommand::Sync),
        ("status", 1) => return Ok(ShellCommand::Status),
        ("extend", 1) => return Ok(ShellCommand::Extend),
        ("logout", 1) => return Ok(ShellCommand::Logout),
        ("help" | "?", 1) => return Ok(ShellCommand::Help),
        ("quit" | "exit", 1) => return Ok(ShellCommand::Quit),
        _ => {}
    }

    match command {
        "login" => parse_login_command(&parts),
        "register" => parse_register_command(&parts),
        "impersonate" => match parts.get(1) {
            Some(uuid) => Ok(ShellCommand::Impersonate(uuid.to_string())),
            None => Err(missing("impersonate", IMPERSONATE_USAGE)),
        },
        "open" => match parts.get(1) {
            Some(path) => Ok(ShellCommand::Open(path.to_string())),
            None => Err(missing("open", OPEN_USAGE)),
        },
        _ => Err(ParseError::UnrecognizedCommand(trimmed.to_string())),
    }
}

fn missing(command: &'static str, usage: &'static str) -> ParseError {
    ParseError::MissingArguments { command, usage }
}

/// Parse a login command: "login EMAIL PASSWORD"
fn parse_login_command(parts: &[&str]) -> Result<ShellCommand, ParseError> {
    match (parts.get(1), parts.get(2)) {
        (Some(email), Some(password)) => Ok(ShellCommand::Login {
            email: email.to_string(),
            password: password.to_string(),
        }),
        _ => Err(missing("login", LOGIN_USAGE)),
    }
}

/// Parse a register command: "register EMAIL PASSWORD CONFIRM FULL NAME"
///
/// Everything after the confirmation is the full name.
fn parse_register_command(parts: &[&str]) -> Result<ShellCommand, ParseError> {
    if parts.len() < 5 {
        return Err(missing("register", REGISTER_USAGE));
    }

    Ok(ShellCommand::Register {
        email: parts[1].to_string(),
        password: parts[2].to_string(),
        confirm_password: parts[3].to_string(),
        full_name: parts[4..].join(" "),
    })
}
