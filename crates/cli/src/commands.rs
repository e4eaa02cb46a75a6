//! Subcommands and their execution.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use socialtodo_client::api::{ApiError, TodoApi, MIN_SEARCH_LEN};
use socialtodo_client::config::ClientConfig;
use socialtodo_client::list_view::{ListView, RealtimeContext};
use socialtodo_client::realtime::{RealtimeClient, SubscriptionState};
use socialtodo_core::forms::{Credentials, ItemUpdate, NewItem, NewList, Registration};
use socialtodo_core::models::{OwnedList, User, UserType};
use socialtodo_core::session::{SessionController, SessionEvent, SessionStore};
use socialtodo_core::types::DbId;

use crate::render;

#[derive(Debug, Parser)]
#[command(name = "socialtodo", version, about = "Shared to-do lists from the terminal")]
pub struct Cli {
    /// Where the session token is kept.
    #[arg(long, env = "SOCIAL_TODO_SESSION_FILE", global = true)]
    pub session_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AccountType {
    /// Can be invited to lists.
    User,
    /// Can also create lists.
    Admin,
}

impl From<AccountType> for UserType {
    fn from(value: AccountType) -> Self {
        match value {
            AccountType::User => UserType::User,
            AccountType::Admin => UserType::Admin,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in and remember the session.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "SOCIAL_TODO_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "SOCIAL_TODO_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long = "type", value_enum, default_value_t = AccountType::User)]
        account_type: AccountType,
    },
    /// Forget the stored session.
    Logout,
    /// Show the signed-in user.
    Whoami,
    /// Show every list you own or were invited to.
    Lists,
    CreateList {
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    DeleteList {
        list_id: DbId,
        /// Required; deleting a list also deletes its items.
        #[arg(long)]
        yes: bool,
    },
    /// Print a list's items.
    Show { list_id: DbId },
    /// Add an item to a list.
    Add {
        list_id: DbId,
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    Update {
        item_id: DbId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Flip an item between open and completed.
    Toggle { item_id: DbId },
    DeleteItem { item_id: DbId },
    /// Find users to invite by username.
    SearchUser { term: String },
    Invite { list_id: DbId, user_id: DbId },
    /// Follow a list live until Ctrl-C.
    Watch { list_id: DbId },
}

/// Everything a command needs.
pub struct App {
    pub config: ClientConfig,
    pub api: Arc<TodoApi>,
}

impl App {
    pub fn new(config: ClientConfig, store: Box<dyn SessionStore>) -> anyhow::Result<Self> {
        let session = Arc::new(SessionController::restore(store));
        let api = TodoApi::from_config(&config, session).context("building HTTP client")?;
        Ok(Self {
            config,
            api: Arc::new(api),
        })
    }

    fn session(&self) -> &Arc<SessionController> {
        self.api.session()
    }

    fn require_session(&self) -> anyhow::Result<()> {
        if !self.session().is_authenticated() {
            bail!("Not logged in. Run `socialtodo login` first.");
        }
        Ok(())
    }

    /// Cached user, fetched once if the session has none.
    async fn current_user(&self) -> anyhow::Result<User> {
        match self.session().user() {
            Some(user) => Ok(user),
            None => Ok(self.api.current_user().await?),
        }
    }

    async fn owned_lists(&self) -> anyhow::Result<(User, Vec<OwnedList>)> {
        let user = self.current_user().await?;
        let lists = self
            .api
            .lists()
            .await?
            .into_iter()
            .map(|list| OwnedList::for_user(list, Some(&user)))
            .collect();
        Ok((user, lists))
    }
}

/// Execute `command`, writing human-readable output to `out`.
pub async fn run(app: &App, command: Command, out: &mut impl Write) -> anyhow::Result<()> {
    match command {
        Command::Login { email, password } => {
            let user = app.api.login(&Credentials::new(&email, &password)).await?;
            writeln!(out, "Logged in as {}", render::user(&user))?;
        }
        Command::Register {
            name,
            username,
            email,
            password,
            account_type,
        } => {
            let form = Registration::new(&name, &username, &email, &password, account_type.into());
            app.api.register(&form).await?;
            writeln!(out, "Account created. Log in with `socialtodo login`.")?;
        }
        Command::Logout => {
            if app.api.logout() {
                writeln!(out, "Logged out.")?;
            } else {
                writeln!(out, "Not logged in.")?;
            }
        }
        Command::Whoami => {
            app.require_session()?;
            let user = app.api.current_user().await?;
            writeln!(out, "{}", render::user(&user))?;
        }
        Command::Lists => {
            app.require_session()?;
            let (_, lists) = app.owned_lists().await?;
            write!(out, "{}", render::lists(&lists))?;
        }
        Command::CreateList { title, description } => {
            app.require_session()?;
            if let Some(user) = app.session().user() {
                if !user.is_admin() {
                    bail!("Only creator accounts can create lists.");
                }
            }
            let created = app
                .api
                .create_list(&NewList::new(&title, description.as_deref()))
                .await?;
            match created {
                Some(list) => writeln!(out, "Created list [{}] {}", list.id, list.title)?,
                None => writeln!(out, "Created list.")?,
            }
        }
        Command::DeleteList { list_id, yes } => {
            app.require_session()?;
            if !yes {
                bail!("Deleting list {list_id} removes all of its items; pass --yes to confirm.");
            }
            app.api.delete_list(list_id).await?;
            writeln!(out, "Deleted list {list_id}.")?;
        }
        Command::Show { list_id } => {
            app.require_session()?;
            let (user, lists) = app.owned_lists().await?;
            let list_admin = list_admin(&user, &lists, list_id);
            let items = app.api.list_items(list_id).await?;
            write!(out, "{}", render::items(&items, Some(&user), list_admin))?;
        }
        Command::Add {
            list_id,
            title,
            description,
        } => {
            app.require_session()?;
            let created = app
                .api
                .create_item(list_id, &NewItem::new(&title, description.as_deref()))
                .await?;
            match created {
                Some(item) => writeln!(out, "Added #{} {}", item.id, item.display_text())?,
                None => writeln!(out, "Added item.")?,
            }
        }
        Command::Update {
            item_id,
            title,
            description,
        } => {
            app.require_session()?;
            let form = ItemUpdate::new(title.as_deref(), description.as_deref());
            app.api.update_item(item_id, &form).await?;
            writeln!(out, "Updated #{item_id}.")?;
        }
        Command::Toggle { item_id } => {
            app.require_session()?;
            match app.api.toggle_item(item_id).await? {
                Some(item) if item.completed => writeln!(out, "Completed #{item_id}.")?,
                Some(_) => writeln!(out, "Reopened #{item_id}.")?,
                None => writeln!(out, "Toggled #{item_id}.")?,
            }
        }
        Command::DeleteItem { item_id } => {
            app.require_session()?;
            app.api.delete_item(item_id).await?;
            writeln!(out, "Deleted #{item_id}.")?;
        }
        Command::SearchUser { term } => {
            app.require_session()?;
            if term.trim().chars().count() < MIN_SEARCH_LEN {
                writeln!(out, "Type at least {MIN_SEARCH_LEN} characters to search.")?;
                return Ok(());
            }
            let users = app.api.search_users(&term).await?;
            write!(out, "{}", render::users(&users))?;
        }
        Command::Invite { list_id, user_id } => {
            app.require_session()?;
            app.api.invite_user(list_id, user_id).await?;
            writeln!(out, "Invited user #{user_id} to list {list_id}.")?;
        }
        Command::Watch { list_id } => {
            app.require_session()?;
            watch(app, list_id, out).await?;
        }
    }
    Ok(())
}

fn list_admin(user: &User, lists: &[OwnedList], list_id: DbId) -> bool {
    lists
        .iter()
        .find(|l| l.list.id == list_id)
        .map(|l| l.is_admin_for(Some(user)))
        .unwrap_or_else(|| user.is_admin())
}

/// Reprint the list on every change until Ctrl-C or the session ends.
async fn watch(app: &App, list_id: DbId, out: &mut impl Write) -> anyhow::Result<()> {
    let (user, lists) = app.owned_lists().await?;
    let list_admin = list_admin(&user, &lists, list_id);

    let realtime = RealtimeContext {
        client: RealtimeClient::from_config(&app.config.realtime),
        authorizer: app.api.clone(),
        policy: app.config.realtime.reconnect.clone(),
    };
    let view = ListView::open(app.api.clone(), Some(realtime), list_id).await?;
    let mut changes = view.changes();
    let mut session_events = app.session().subscribe();
    let mut live = view.watch_subscription();

    write!(out, "{}", render::items(&view.items().await, Some(&user), list_admin))?;
    out.flush()?;

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            changed = changes.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                writeln!(out)?;
                write!(out, "{}", render::items(&view.items().await, Some(&user), list_admin))?;
                out.flush()?;
            }
            state = next_state(&mut live) => {
                let line = match state {
                    SubscriptionState::Active => "live updates on",
                    SubscriptionState::Subscribing => "connecting to live updates...",
                    SubscriptionState::Unsubscribed => "live updates off",
                };
                tracing::info!(list_id, "{line}");
            }
            event = session_events.recv() => {
                if let Ok(SessionEvent::Ended { .. }) = event {
                    break Err(anyhow::Error::from(ApiError::Unauthorized));
                }
            }
        }
    };

    view.close().await;
    outcome
}

/// Next subscription state change; pends forever without a subscription.
async fn next_state(
    live: &mut Option<tokio::sync::watch::Receiver<SubscriptionState>>,
) -> SubscriptionState {
    match live {
        Some(rx) => match rx.changed().await {
            Ok(()) => *rx.borrow_and_update(),
            Err(_) => {
                *live = None;
                SubscriptionState::Unsubscribed
            }
        },
        None => std::future::pending().await,
    }
}
