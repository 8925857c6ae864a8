//! Console command parsing.

use std::path::PathBuf;

use crate::api::AccountDraft;

/// One line of operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Email(String),
    RequestOtp,
    Verify(String),
    Submit,
    Status,
    Reset,
    Accounts(AccountsCommand),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccountsCommand {
    List,
    Summary,
    Create(AccountDraft),
    Update { id: i64, fields: Vec<(String, String)> },
    Delete(i64),
    DeleteTokens(String),
    Enable(u32),
    Upload(PathBuf),
}

pub const HELP: &str = "\
Application flow:
  email <address>         get a session token for an applicant
  otp                     send an OTP to the applicant's phone
  verify <code>           verify the OTP
  submit                  submit the application
  status                  show the current stage
  reset                   start over
Accounts:
  accounts [list]         list accounts, most recently hit first
  accounts summary        total / disabled / enabled counts
  accounts create email=<e> id_user=<u> [password=<p>] [disabled=true] [hit_count=<n>]
  accounts update <id> key=value...
  accounts delete <id>
  accounts delete-tokens <id_user>
  accounts enable <minutes>
  accounts upload <path>
Other:
  help, quit";

/// Parse a trimmed, non-empty input line.
pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let head = words.next().ok_or_else(|| "empty command".to_string())?;
    let rest: Vec<&str> = words.collect();

    match head.to_ascii_lowercase().as_str() {
        "email" => single_arg(&rest, "email <address>").map(Command::Email),
        "otp" => no_args(&rest, Command::RequestOtp),
        "verify" => single_arg(&rest, "verify <code>").map(Command::Verify),
        "submit" => no_args(&rest, Command::Submit),
        "status" => no_args(&rest, Command::Status),
        "reset" => no_args(&rest, Command::Reset),
        "accounts" | "account" => parse_accounts(&rest).map(Command::Accounts),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "/quit" => Ok(Command::Quit),
        other => Err(format!("unknown command: {other} (try 'help')")),
    }
}

fn parse_accounts(args: &[&str]) -> Result<AccountsCommand, String> {
    let Some((sub, rest)) = args.split_first() else {
        return Ok(AccountsCommand::List);
    };
    match *sub {
        "list" => Ok(AccountsCommand::List),
        "summary" => Ok(AccountsCommand::Summary),
        "create" => {
            let fields = key_values(rest)?;
            let mut draft = AccountDraft::default();
            apply_fields(&mut draft, &fields)?;
            Ok(AccountsCommand::Create(draft))
        }
        "update" => {
            let (id, rest) = rest
                .split_first()
                .ok_or_else(|| "usage: accounts update <id> key=value...".to_string())?;
            let id = parse_id(id)?;
            let fields = key_values(rest)?;
            if fields.is_empty() {
                return Err("usage: accounts update <id> key=value...".to_string());
            }
            // validate keys and values up front
            apply_fields(&mut AccountDraft::default(), &fields)?;
            Ok(AccountsCommand::Update { id, fields })
        }
        "delete" => {
            let id = single_arg(rest, "accounts delete <id>")?;
            Ok(AccountsCommand::Delete(parse_id(&id)?))
        }
        "delete-tokens" => {
            single_arg(rest, "accounts delete-tokens <id_user>").map(AccountsCommand::DeleteTokens)
        }
        "enable" => {
            let minutes = single_arg(rest, "accounts enable <minutes>")?;
            minutes
                .parse::<u32>()
                .map(AccountsCommand::Enable)
                .map_err(|_| format!("minutes must be a whole number, got {minutes:?}"))
        }
        "upload" => {
            if rest.is_empty() {
                return Err("usage: accounts upload <path>".to_string());
            }
            Ok(AccountsCommand::Upload(PathBuf::from(rest.join(" "))))
        }
        other => Err(format!("unknown accounts command: {other}")),
    }
}

/// Apply `key=value` pairs onto a draft.
pub fn apply_fields(draft: &mut AccountDraft, fields: &[(String, String)]) -> Result<(), String> {
    for (key, value) in fields {
        match key.as_str() {
            "email" => draft.email = value.clone(),
            "password" => draft.password = value.clone(),
            "id_user" | "user" => draft.id_user = value.clone(),
            "disabled" | "is_disabled" => {
                draft.is_disabled = parse_bool(value)
                    .ok_or_else(|| format!("{key} must be true or false, got {value:?}"))?;
            }
            "hit_count" | "hits" => {
                draft.hit_count = value
                    .parse()
                    .map_err(|_| format!("{key} must be a number, got {value:?}"))?;
            }
            other => return Err(format!("unknown account field: {other}")),
        }
    }
    Ok(())
}

fn key_values(args: &[&str]) -> Result<Vec<(String, String)>, String> {
    args.iter()
        .map(|arg| {
            arg.split_once('=')
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .ok_or_else(|| format!("expected key=value, got {arg:?}"))
        })
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn parse_id(raw: &str) -> Result<i64, String> {
    raw.parse()
        .map_err(|_| format!("account id must be a number, got {raw:?}"))
}

fn single_arg(args: &[&str], usage: &str) -> Result<String, String> {
    match args {
        [one] => Ok((*one).to_string()),
        _ => Err(format!("usage: {usage}")),
    }
}

fn no_args(args: &[&str], command: Command) -> Result<Command, String> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(format!("unexpected arguments: {}", args.join(" ")))
    }
}
