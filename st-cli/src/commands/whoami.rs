//! Whoami command.

use st_core::config::ConfigHandle;
use st_core::error::StResult;
use st_services::Service;

use crate::OutputFormat;

pub async fn run(config: ConfigHandle, format: OutputFormat) -> StResult<()> {
    let service = super::authenticated_service(&config).await?;
    let user = service.whoami().await;
    service.shutdown()?;
    let user = user?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&user).unwrap_or_default());
        }
        OutputFormat::Text => {
            println!("  Login:        {}", user.login);
            println!("  Display name: {}", user.display_name);
            println!("  User id:      {}", user.id);
            if !user.broadcaster_type.is_empty() {
                println!("  Broadcaster:  {}", user.broadcaster_type);
            }
        }
    }
    Ok(())
}
