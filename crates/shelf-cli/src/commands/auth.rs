//! Sign-in command handlers

use anyhow::{bail, Context, Result};
use tracing::warn;

use shelf_core::auth::tokens_from_redirect;
use shelf_core::{AuthClient, Config, Session};

use super::backend_settings;
use crate::editor::{is_interactive, prompt_line};
use crate::output::{Output, OutputFormat};

/// Sign in and save the session
///
/// Without `--token`, opens the provider's sign-in page and asks for the
/// URL the browser lands on afterwards.
pub async fn login(config: &Config, token: Option<String>, output: &Output) -> Result<()> {
    let (url, key) = backend_settings(config)?;
    let client = AuthClient::new(url, key)?;

    let pasted = match token {
        Some(token) => token,
        None => {
            if !is_interactive() {
                bail!("No terminal to complete sign-in. Pass --token instead.");
            }
            let authorize = client.authorize_url(&config.oauth_provider, config.redirect_url.as_deref())?;
            println!("Opening {} sign-in in your browser:", config.oauth_provider);
            println!("  {}", authorize);
            if let Err(e) = open::that(&authorize) {
                warn!(error = %e, "Could not open browser");
                println!("(Could not open a browser; visit the URL above.)");
            }
            println!();
            prompt_line("Paste the URL you were redirected to")?
                .ok_or_else(|| anyhow::anyhow!("Sign-in cancelled."))?
        }
    };

    let (access_token, refresh_token) =
        tokens_from_redirect(&pasted).ok_or_else(|| anyhow::anyhow!("No access token found in input."))?;

    let session = client
        .sign_in_with_token(&access_token, refresh_token)
        .await
        .context("Sign-in failed")?;
    session
        .save(&config.session_path())
        .context("Failed to save session")?;

    output.success(&format!("Signed in as {}", session.user.display_name()));
    Ok(())
}

/// Revoke and forget the saved session
pub async fn logout(config: &Config, output: &Output) -> Result<()> {
    let path = config.session_path();
    let Some(session) = Session::load(&path)? else {
        output.message("Not signed in.");
        return Ok(());
    };

    // Forget the local session even if the backend cannot be reached
    if let Ok((url, key)) = backend_settings(config) {
        if let Err(e) = AuthClient::new(url, key)?.sign_out(&session.access_token).await {
            output.warn(&format!("Could not revoke session on the backend: {}", e));
        }
    }

    Session::remove(&path)?;
    output.success("Signed out");
    Ok(())
}

/// Show the signed-in user from the saved session
pub fn whoami(config: &Config, output: &Output) -> Result<()> {
    let session = Session::load(&config.session_path())?
        .ok_or_else(|| anyhow::anyhow!("Not signed in. Run `shelf login` first."))?;
    let user = &session.user;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "id": user.id,
                    "email": user.email,
                    "name": user.full_name,
                    "avatar_url": user.avatar_url,
                    "expires_at": session.expires_at,
                    "expired": session.is_expired(),
                })
            );
        }
        OutputFormat::Quiet => println!("{}", user.id),
        OutputFormat::Human => {
            println!("{}", user.display_name());
            if !user.email.is_empty() {
                println!("  Email:   {}", user.email);
            }
            println!("  User ID: {}", user.id);
            if let Some(expires_at) = session.expires_at {
                let state = if session.is_expired() { "expired" } else { "expires" };
                println!("  Session: {} {}", state, expires_at.format("%Y-%m-%d %H:%M"));
            }
        }
    }
    Ok(())
}
