use std::{
    env,
    io::{self, Write},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use client::{ChatApi, ClientError, HttpChatApi, Session, SessionContext, SessionFile};
use rpassword::prompt_password;
use shared::config::ClientConfig;

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Log in and store the session token
    Login {
        /// Username to log in as (prompted when omitted)
        #[arg(long, short)]
        username: Option<String>,
    },
    /// Remove the stored session token
    Logout,
    /// Show the logged-in user
    Me,
}

pub async fn run(command: SessionCommand, config: &ClientConfig) -> Result<()> {
    match command {
        SessionCommand::Login { username } => login(username, config).await,
        SessionCommand::Logout => logout(),
        SessionCommand::Me => me(config).await,
    }
}

/// Session file location; `BUZZ_SESSION_FILE` overrides the default.
pub fn session_file() -> SessionFile {
    env::var("BUZZ_SESSION_FILE")
        .ok()
        .filter(|path| !path.trim().is_empty())
        .map_or_else(SessionFile::default_location, SessionFile::new)
}

/// Restores the stored session into a fresh context.
///
/// # Errors
/// Fails when no token is stored, the token cannot be decoded, or it expired.
pub fn restore_session() -> Result<(Arc<SessionContext>, Session)> {
    let file = session_file();
    let credential = file
        .load()
        .with_context(|| format!("failed to read session file {}", file.path().display()))?;
    let Some(credential) = credential else {
        bail!("no active session found; run `buzz session login` first");
    };

    let context = Arc::new(SessionContext::new());
    context
        .login(credential.expose())
        .context("stored session token is invalid; run `buzz session login` again")?;
    let session = context
        .current()
        .map_err(|_| anyhow::anyhow!("session expired; run `buzz session login` to sign in again"))?;
    Ok((context, session))
}

/// Wraps a client error with the text the user should see.
pub fn explain(err: ClientError) -> anyhow::Error {
    let message = if err.is_auth_failure() {
        format!("{} Run `buzz session login`.", err.user_message())
    } else {
        err.user_message()
    };
    anyhow::Error::new(err).context(message)
}

async fn login(username: Option<String>, config: &ClientConfig) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    let password = prompt_password("Password: ")?;
    if password.trim().is_empty() {
        bail!("password must not be empty");
    }

    let api = HttpChatApi::new(config)?;
    let token = api.login(&username, &password).await.map_err(|err| {
        if err.is_auth_failure() {
            anyhow::Error::new(err).context("incorrect username or password")
        } else {
            explain(err)
        }
    })?;

    let context = SessionContext::new();
    let session = context
        .login(token.access_token)
        .context("server returned an unreadable token")?;

    let file = session_file();
    file.save(session.credential())
        .with_context(|| format!("failed to write session file {}", file.path().display()))?;

    println!("Logged in as {username} (user id {})", session.user_id);
    println!("Session saved to {}", file.path().display());
    Ok(())
}

fn logout() -> Result<()> {
    let file = session_file();
    let removed = file
        .remove()
        .with_context(|| format!("failed to remove session file {}", file.path().display()))?;
    if removed {
        println!("Removed session at {}", file.path().display());
    } else {
        println!("No session found at {}", file.path().display());
    }
    Ok(())
}

async fn me(config: &ClientConfig) -> Result<()> {
    let (_context, session) = restore_session()?;
    let api = HttpChatApi::new(config)?;
    let profile = api.profile(&session).await.map_err(explain)?;

    println!("username: {}", profile.username);
    if let Some(email) = &profile.email {
        println!("email: {email}");
    }
    println!("user id: {}", session.user_id);
    if let Some(expires_at) = session.expires_at {
        println!("session expires at: {expires_at}");
    }
    Ok(())
}

fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    io::stdout().flush().ok();
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim().to_string();
    if trimmed.is_empty() {
        bail!("input must not be empty");
    }
    Ok(trimmed)
}
