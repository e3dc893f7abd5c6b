//! Interactive partner portal shell.
//!
//! Signs in against the portal backend, keeps the session in a local file, checks
//! every `open` against the portal's route guards, and runs the idle and session
//! timeouts. Every line typed counts as activity.

use anyhow::{Context, Result};
use log::{debug, info};
use partner_portal::{
    AuthError, FileStore, Reconciliation, SessionManager,
    guard::{
        GuardDecision, LOGIN_PATH, RouteTable, landing_page, post_login_target,
        unauthorized_redirect,
    },
    timeout::{
        ActivityEvent, InactivityMonitor, Navigator, SessionTimeoutMonitor, TimeoutHooks,
        TokioScheduler,
    },
};
use pico_args::Arguments;
use portal_client::{
    commands::{HELP_TEXT, ShellCommand, parse_command},
    config::ClientConfig,
    http_api::HttpPortalApi,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
Interactive shell for the partner portal

USAGE:
  portal_client [OPTIONS]

OPTIONS:
  --api-url URL         Backend base URL      [default: env PORTAL_API_URL or http://localhost:5000/api/v1]
  --session-file PATH   Persisted session     [default: env PORTAL_SESSION_FILE or portal_session.json]

FLAGS:
  -h, --help            Print help information

ENVIRONMENT:
  PORTAL_REQUEST_TIMEOUT_SECS           Per-request timeout (10)
  PORTAL_INACTIVITY_TIMEOUT_SECS        Idle logout (300)
  PORTAL_SESSION_TIMEOUT_MINUTES        Session length without activity (30)
  PORTAL_SESSION_WARNING_MINUTES        Countdown before it ends (5)
  PORTAL_STOP_IMPERSONATION_ON_LOGOUT   Close impersonation on logout (false)
  RUST_LOG                              Log filter
";

/// Tracks the shell's current location and announces moves
struct ShellNavigator {
    location: Mutex<String>,
}

impl ShellNavigator {
    fn new(start: &str) -> Self {
        Self {
            location: Mutex::new(start.to_string()),
        }
    }

    fn location(&self) -> String {
        self.location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Navigator for ShellNavigator {
    fn navigate(&self, path: &str) {
        *self.location.lock().unwrap_or_else(PoisonError::into_inner) = path.to_string();
        println!("-> {}", path);
    }
}

struct Shell {
    manager: Arc<SessionManager>,
    routes: RouteTable,
    navigator: Arc<ShellNavigator>,
    inactivity: InactivityMonitor,
    timeout: SessionTimeoutMonitor,
    /// Location a guard bounced to login, honored after the next sign-in
    pending_from: Option<String>,
}

impl Shell {
    fn start_monitors(&self) {
        let idle = self.inactivity.start();
        let session = self.timeout.start();
        if idle && session {
            debug!("Timeout monitors armed");
        }
    }

    fn stop_monitors(&self) {
        self.inactivity.stop();
        self.timeout.stop();
    }

    fn record_activity(&self) {
        self.inactivity.record_activity(ActivityEvent::KeyPress);
        self.timeout.record_activity(ActivityEvent::KeyPress);
    }

    fn signed_in(&mut self) {
        self.start_monitors();
        let target = post_login_target(
            &self.routes,
            &self.manager.snapshot(),
            self.pending_from.take().as_deref(),
        );
        self.navigator.navigate(&target);
    }

    /// Report a failure; a rejected credential follows the global 401 path
    fn report(&self, err: AuthError) {
        println!("Error: {}", err.client_message());
        if err.is_unauthorized() {
            self.stop_monitors();
            if let Some(redirect) = unauthorized_redirect(&self.navigator.location()) {
                self.navigator.navigate(&redirect.to);
            }
        }
    }

    fn open(&mut self, path: &str) {
        match self.routes.check(&self.manager.snapshot(), path) {
            GuardDecision::Allow => self.navigator.navigate(path),
            GuardDecision::Pending => println!("Session is still loading, try again"),
            GuardDecision::Redirect(redirect) => {
                if redirect.from.is_some() {
                    self.pending_from = redirect.from;
                }
                self.navigator.navigate(&redirect.to);
            }
        }
    }

    fn print_status(&self) {
        let session = self.manager.snapshot();
        let timeout = self.timeout.status();

        println!("Location:       {}", self.navigator.location());
        println!("Signed in:      {}", session.is_authenticated);
        if let Some(ctx) = &session.impersonation {
            println!(
                "Impersonating:  {} for {}",
                ctx.impersonated_user.full_name,
                self.manager.impersonation_elapsed().unwrap_or_default()
            );
        }
        println!("Idle monitor:   {}", running(self.inactivity.is_running()));
        println!("Session timer:  {}", running(self.timeout.is_running()));
        if timeout.show_warning {
            println!("Expires in:     {}s", timeout.time_remaining_secs);
        }
        println!("Last activity:  {}", timeout.last_activity.format("%H:%M:%S"));
    }

    fn print_identity(&self) {
        let session = self.manager.snapshot();
        let Some(user) = &session.current_user else {
            println!("Not signed in");
            return;
        };

        println!("{} <{}> ({}, {})", user.full_name, user.email, user.role, user.uuid);
        if let Some(ctx) = &session.impersonation {
            println!(
                "Viewing as this user; signed in as {} <{}> since {}",
                ctx.original_admin_user.full_name,
                ctx.original_admin_user.email,
                ctx.started_at.format("%H:%M:%S")
            );
        }
    }

    /// Run one command; returns `false` when the shell should exit
    async fn execute(&mut self, command: ShellCommand) -> bool {
        match command {
            ShellCommand::Login { email, password } => {
                match self.manager.login(&email, &password).await {
                    Ok(message) => {
                        println!("{}", message);
                        self.signed_in();
                    }
                    Err(e) => self.report(e),
                }
            }
            ShellCommand::Register {
                email,
                password,
                confirm_password,
                full_name,
            } => {
                match self
                    .manager
                    .register(&full_name, &email, &password, &confirm_password)
                    .await
                {
                    Ok(message) => {
                        println!("{}", message);
                        self.signed_in();
                    }
                    Err(e) => self.report(e),
                }
            }
            ShellCommand::WhoAmI => self.print_identity(),
            ShellCommand::Refresh => match self.manager.refresh_profile().await {
                Ok(user) => println!("Profile refreshed for {}", user.full_name),
                Err(e) => self.report(e),
            },
            ShellCommand::Impersonate(uuid) => {
                match self.manager.start_impersonation(&uuid).await {
                    Ok(message) => {
                        println!("{}", message);
                        if let Some(role) = self.manager.snapshot().role() {
                            self.navigator.navigate(landing_page(role));
                        }
                    }
                    Err(e) => self.report(e),
                }
            }
            ShellCommand::StopImpersonation => match self.manager.stop_impersonation().await {
                Ok(message) => {
                    println!("{}", message);
                    if let Some(role) = self.manager.snapshot().role() {
                        self.navigator.navigate(landing_page(role));
                    }
                }
                Err(e) => self.report(e),
            },
            ShellCommand::Sync => match self.manager.reconcile_impersonation().await {
                Ok(Reconciliation::Ended) => {
                    println!("The server ended this impersonation; signed out");
                    self.stop_monitors();
                    self.navigator.navigate(LOGIN_PATH);
                }
                Ok(outcome) => println!("Impersonation state: {:?}", outcome),
                Err(e) => self.report(e),
            },
            ShellCommand::Status => self.print_status(),
            ShellCommand::Open(path) => self.open(&path),
            ShellCommand::Extend => {
                self.timeout.handle_extend_session();
                self.inactivity.reset_timer();
                println!("Session extended");
            }
            ShellCommand::Logout => {
                self.inactivity.stop();
                self.timeout.handle_logout_now();
                println!("Logged out");
            }
            ShellCommand::Help => print!("{HELP_TEXT}"),
            ShellCommand::Quit => return false,
        }
        true
    }
}

fn running(flag: bool) -> &'static str {
    if flag { "running" } else { "stopped" }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let api_url: Option<String> = pargs.opt_value_from_str("--api-url").ok().flatten();
    let session_file: Option<PathBuf> = pargs.opt_value_from_str("--session-file").ok().flatten();

    env_logger::builder().format_target(false).init();

    let config =
        ClientConfig::from_env(api_url, session_file).context("Invalid client configuration")?;
    info!(
        "Using backend {} with session file {}",
        config.api_url,
        config.session_file.display()
    );

    run(config).await
}

async fn run(config: ClientConfig) -> Result<()> {
    let api = Arc::new(HttpPortalApi::from_config(&config).context("Failed to create API client")?);
    let store = Arc::new(FileStore::new(&config.session_file));
    let manager = Arc::new(SessionManager::with_config(api, store, config.session.clone()));

    if let Some(refresh) = manager.initialize() {
        refresh.await.context("Profile refresh task failed")?;
    }
    manager.check_impersonation_expiry();

    let routes = RouteTable::portal();
    let navigator = Arc::new(ShellNavigator::new("/"));
    let scheduler = Arc::new(TokioScheduler::current());

    let inactivity = InactivityMonitor::new(
        config.inactivity.clone(),
        manager.clone(),
        navigator.clone(),
        scheduler.clone(),
    );
    let hooks = TimeoutHooks {
        on_warning: Some(Box::new(|remaining: Duration| {
            println!(
                "\nYour session ends in {} minute(s). Type 'extend' to stay signed in or 'logout' to leave.",
                remaining.as_secs().div_ceil(60)
            );
        })),
        on_timeout: Some(Box::new(|| {
            println!("\nYour session timed out. Please log in again.");
        })),
    };
    let timeout = SessionTimeoutMonitor::with_hooks(
        config.session_timeout.clone(),
        manager.clone(),
        navigator.clone(),
        scheduler,
        hooks,
    );

    let mut shell = Shell {
        manager,
        routes,
        navigator,
        inactivity,
        timeout,
        pending_from: None,
    };

    if let Some(user) = shell.manager.current_user() {
        println!("Welcome back, {}", user.full_name);
        shell.start_monitors();
    }
    let start = shell.routes.check(&shell.manager.snapshot(), "/");
    if let Some(target) = start.redirect_target() {
        shell.navigator.navigate(target);
    }
    println!("Type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("portal> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        shell.record_activity();
        if shell.manager.check_impersonation_expiry() {
            println!("Impersonation time limit reached; signed out");
            shell.stop_monitors();
            shell.navigator.navigate(LOGIN_PATH);
            continue;
        }

        match parse_command(&line) {
            Ok(command) => {
                if !shell.execute(command).await {
                    break;
                }
            }
            Err(e) => println!("{}", e),
        }
    }

    shell.stop_monitors();
    Ok(())
}
