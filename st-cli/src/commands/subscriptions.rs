//! Subscriptions command - list what Helix has registered for this client.

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};

use st_core::config::ConfigHandle;
use st_core::error::StResult;
use st_services::Service;

use crate::OutputFormat;

/// Run the subscriptions command.
pub async fn run(config: ConfigHandle, format: OutputFormat) -> StResult<()> {
    let service = super::authenticated_service(&config).await?;
    let records = service.list_subscriptions().await;
    service.shutdown()?;
    let records = records?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&records).unwrap_or_default());
        }
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No subscriptions.");
                return Ok(());
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Id", "Type", "Version", "Status", "Condition", "Created"]);

            for record in &records {
                let created = record
                    .created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                table.add_row(vec![
                    super::truncate(&record.id, 12),
                    record.kind.clone(),
                    record.version.clone(),
                    record.status.clone(),
                    super::truncate(&record.condition.to_string(), 60),
                    created,
                ]);
            }

            println!("{table}");
            println!("\n{} subscription(s)", records.len());
        }
    }
    Ok(())
}
