//! Console: stdin/stdout REPL over the application flow and account
//! directory.

pub mod command;

pub use command::{AccountsCommand, Command, HELP, parse};

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt, stream};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::accounts::{AccountDirectory, AccountSummary};
use crate::api::{Account, AccountDraft};
use crate::flow::{FlowController, FlowEvent, FlowSnapshot, Notice, NoticeLevel, StageKind};

/// Stream of trimmed, non-empty input lines.
pub type LineStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Countdown ticks at or below this are always printed.
const COUNTDOWN_FINAL_SECS: u32 = 5;
/// Otherwise print every this many seconds.
const COUNTDOWN_PRINT_EVERY: u32 = 10;

/// Whether the loop should keep reading input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Output(String),
    Quit,
}

pub struct Console {
    flow: Arc<FlowController>,
    accounts: Arc<AccountDirectory>,
}

impl Console {
    pub fn new(flow: Arc<FlowController>, accounts: Arc<AccountDirectory>) -> Self {
        Self { flow, accounts }
    }

    /// Read commands until EOF or `quit`.
    pub async fn run(&self, mut lines: LineStream) {
        let printer = spawn_event_printer(&self.flow);

        eprint!("> ");
        while let Some(line) = lines.next().await {
            match self.handle_line(&line).await {
                Reply::Output(text) => {
                    if !text.is_empty() {
                        println!("\n{text}\n");
                    }
                }
                Reply::Quit => break,
            }
            eprint!("> ");
        }

        printer.abort();
    }

    /// Parse and execute one input line.
    pub async fn handle_line(&self, line: &str) -> Reply {
        match parse(line) {
            Ok(Command::Quit) => Reply::Quit,
            Ok(command) => Reply::Output(self.execute(command).await),
            Err(usage) => Reply::Output(format!("❓ {usage}")),
        }
    }

    pub async fn execute(&self, command: Command) -> String {
        match command {
            Command::Email(email) => {
                let _ = self.flow.submit_email(&email).await;
                render_flow_result(&self.flow.snapshot())
            }
            Command::RequestOtp => {
                let _ = self.flow.request_otp().await;
                render_flow_result(&self.flow.snapshot())
            }
            Command::Verify(code) => {
                let _ = self.flow.verify_otp(&code).await;
                render_flow_result(&self.flow.snapshot())
            }
            Command::Submit => {
                let _ = self.flow.submit_application().await;
                render_flow_result(&self.flow.snapshot())
            }
            Command::Status => render_snapshot(&self.flow.snapshot()),
            Command::Reset => {
                self.flow.reset();
                "Session reset. Enter an email to start again.".to_string()
            }
            Command::Accounts(cmd) => self.execute_accounts(cmd).await,
            Command::Help => HELP.to_string(),
            Command::Quit => String::new(),
        }
    }

    async fn execute_accounts(&self, cmd: AccountsCommand) -> String {
        match cmd {
            AccountsCommand::List => match self.accounts.refresh().await {
                Ok(_) => render_accounts(&self.accounts.accounts().await),
                Err(e) => failure(e.user_message()),
            },
            AccountsCommand::Summary => {
                if let Err(e) = self.accounts.refresh().await {
                    return failure(e.user_message());
                }
                render_summary(&self.accounts.summary().await)
            }
            AccountsCommand::Create(draft) => match self.accounts.save(draft, None).await {
                Ok(outcome) => success(outcome.message()),
                Err(e) => failure(e.user_message()),
            },
            AccountsCommand::Update { id, fields } => {
                let account = match self.find_account(id).await {
                    Some(account) => account,
                    None => return failure(format!("No account with id {id}.")),
                };
                let mut draft = AccountDraft::from(&account);
                if let Err(e) = command::apply_fields(&mut draft, &fields) {
                    return failure(e);
                }
                match self.accounts.save(draft, Some(&account)).await {
                    Ok(outcome) => success(outcome.message()),
                    Err(e) => failure(e.user_message()),
                }
            }
            AccountsCommand::Delete(id) => match self.accounts.delete(id).await {
                Ok(()) => success("Account deleted."),
                Err(e) => failure(e.user_message()),
            },
            AccountsCommand::DeleteTokens(id_user) => {
                match self.accounts.delete_tokens(&id_user).await {
                    Ok(()) => success("User tokens deleted successfully."),
                    Err(e) => failure(format!(
                        "An error occurred while deleting the tokens. {}",
                        e.user_message()
                    )),
                }
            }
            AccountsCommand::Enable(minutes) => {
                match self.accounts.enable_disabled(minutes).await {
                    Ok(message) => success(message),
                    Err(e) => failure(e.user_message()),
                }
            }
            AccountsCommand::Upload(path) => match self.accounts.upload_spreadsheet(&path).await {
                Ok(()) => success("File uploaded and accounts created successfully."),
                Err(e) => failure(e.user_message()),
            },
        }
    }

    async fn find_account(&self, id: i64) -> Option<Account> {
        if let Some(account) = self.accounts.find(id).await {
            return Some(account);
        }
        if let Err(e) = self.accounts.refresh().await {
            tracing::warn!(error = %e, "Failed to refresh accounts");
        }
        self.accounts.find(id).await
    }
}

/// Lines from stdin, fed through a channel so reading never blocks the
/// command loop.
pub fn stdin_lines() -> LineStream {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        let reader = BufReader::new(tokio::io::stdin());
        let mut lines = reader.lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        eprint!("> ");
                        continue;
                    }
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break, // EOF
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|line| (line, rx))
    }))
}

/// Print asynchronous flow events (countdown, expiry) as they arrive.
fn spawn_event_printer(flow: &FlowController) -> JoinHandle<()> {
    let mut rx = flow.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = render_event(&event) {
                        eprintln!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Render events that happen outside a command; notices and stage changes
/// are reported by the command that caused them.
pub fn render_event(event: &FlowEvent) -> Option<String> {
    match event {
        FlowEvent::Countdown { remaining_secs } => {
            let secs = *remaining_secs;
            let worth_printing = secs > 0
                && (secs <= COUNTDOWN_FINAL_SECS || secs % COUNTDOWN_PRINT_EVERY == 0);
            worth_printing.then(|| {
                format!(
                    "⏳ OTP expires in {}",
                    crate::flow::format_remaining(secs)
                )
            })
        }
        FlowEvent::OtpExpired => Some(render_notice(&Notice::error(
            "OTP expired. Please request a new OTP.",
        ))),
        FlowEvent::StageChanged { .. } | FlowEvent::Notice(_) => None,
    }
}

pub fn render_notice(notice: &Notice) -> String {
    let icon = match notice.level {
        NoticeLevel::Success => "✅",
        NoticeLevel::Warning => "⚠️ ",
        NoticeLevel::Error => "❌",
    };
    format!("{icon} {}", notice.text)
}

/// Notices from the last action plus whatever the new stage asks for next.
pub fn render_flow_result(snapshot: &FlowSnapshot) -> String {
    let mut lines: Vec<String> = snapshot.notices.iter().map(render_notice).collect();
    lines.extend(stage_details(snapshot));
    lines.join("\n")
}

/// Full status view.
pub fn render_snapshot(snapshot: &FlowSnapshot) -> String {
    let mut lines = vec![format!("Stage: {}", snapshot.stage)];
    if let Some(email) = &snapshot.email {
        lines.push(format!("Email: {email}"));
    }
    if let Some(phone) = snapshot
        .application
        .as_ref()
        .and_then(|a| a.phone_number())
    {
        lines.push(format!("Phone: {phone}"));
    }
    if let Some(expires) = snapshot.token_expires_at {
        lines.push(format!("Token expires at: {}", expires.to_rfc3339()));
    }
    if let Some(op) = snapshot.in_flight {
        lines.push(format!("In flight: {op}"));
    }
    lines.extend(stage_details(snapshot));
    lines.extend(snapshot.notices.iter().map(render_notice));
    lines.join("\n")
}

fn stage_details(snapshot: &FlowSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    match snapshot.stage {
        StageKind::AwaitingEmail => lines.push("Next: email <address>".to_string()),
        StageKind::AwaitingOtpRequest => lines.push("Next: otp".to_string()),
        StageKind::AwaitingOtpEntry => {
            if let Some(display) = &snapshot.countdown_display {
                lines.push(format!("OTP (expires in {display}). Next: verify <code>"));
            }
        }
        StageKind::Verified => lines.push("Next: submit".to_string()),
        StageKind::Submitted => {}
    }
    if let Some(receipt) = &snapshot.receipt {
        lines.push(format!("Your reservation link: {}", receipt.reservation_link));
        lines.push(format!("Pay via Mastercard: {}", receipt.payment_url));
    }
    lines
}

pub fn render_summary(summary: &AccountSummary) -> String {
    format!(
        "Total Accounts: {}\nDisabled Accounts: {}\nEnabled Accounts: {}",
        summary.total, summary.disabled, summary.enabled
    )
}

pub fn render_accounts(accounts: &[Account]) -> String {
    let mut lines = vec![render_summary(&AccountSummary::of(accounts))];
    if accounts.is_empty() {
        lines.push("(no accounts)".to_string());
    }
    for account in accounts {
        let last_hit = account
            .last_hit_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if account.is_disabled { "✗" } else { " " };
        lines.push(format!(
            "{marker} [{}] {} | User ID: {} | Disabled: {} | Hit Count: {} | Last Hit At: {}",
            account.id,
            account.email,
            account.id_user,
            if account.is_disabled { "Yes" } else { "No" },
            account.hit_count,
            last_hit,
        ));
    }
    lines.join("\n")
}

fn success(text: impl Into<String>) -> String {
    render_notice(&Notice::success(text))
}

fn failure(text: impl Into<String>) -> String {
    render_notice(&Notice::error(text))
}
