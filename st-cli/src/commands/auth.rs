//! Auth command - obtain or discard the cached access token.

use console::style;

use st_auth::{AuthResult, CredentialStore, FileCredentialStore};
use st_core::config::ConfigHandle;
use st_core::error::StResult;
use st_services::Service;

use crate::OutputFormat;

/// Run the auth command.
pub async fn run(config: ConfigHandle, force: bool, logout: bool, format: OutputFormat) -> StResult<()> {
    if logout || force {
        let path = config.read().await.effective_credentials_path()?;
        FileCredentialStore::new(&path).clear()?;
        if logout {
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "logged_out": true })),
                OutputFormat::Text => {
                    println!("{} Cached token removed.", style("OK").green().bold())
                }
            }
            return Ok(());
        }
    }

    let service = super::create_service(&config).await?;
    let result = service.ensure_authenticated(super::print_authorization_url).await;
    service.shutdown()?;
    let result = result?;

    let source = match &result {
        AuthResult::CachedToken { .. } => "cached",
        AuthResult::NewAuthorization { .. } => "new",
        AuthResult::None => "none",
    };
    let login = result.login().unwrap_or("unknown");

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "authenticated": result.is_authenticated(),
                "source": source,
                "login": result.login(),
            });
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        }
        OutputFormat::Text => {
            let how = if source == "cached" { "using cached token" } else { "token saved" };
            println!(
                "{} Authenticated as {} ({how}).",
                style("OK").green().bold(),
                style(login).bold()
            );
        }
    }
    Ok(())
}
