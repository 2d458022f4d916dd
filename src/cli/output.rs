//! CLI output: error mapping and object rendering.

use crate::cli::parse::OutputFormat;
use crate::context::ManagedObject;
use crate::date_format::DateFormat;
use crate::error::{CliError, ContextError};
use crate::schema::EntityDescription;
use crate::value::Value;
use comfy_table::Table;

/// Map errors to a stable string for CLI output.
pub fn map_error(e: &CliError) -> String {
    match e {
        CliError::Save(save) if save.is_propagation_failure() => format!(
            "{} (changes reached earlier stages and were not rolled back)",
            save
        ),
        CliError::Context(ContextError::Validation { .. }) => format!("Rejected: {}", e),
        _ => e.to_string(),
    }
}

/// Render fetched objects as a table with one column per declared attribute,
/// or as a JSON array.
pub fn render_objects(
    entity: &EntityDescription,
    objects: &[ManagedObject],
    date_format: &DateFormat,
    format: OutputFormat,
) -> Result<String, CliError> {
    if format == OutputFormat::Json {
        let rows: Vec<serde_json::Value> = objects
            .iter()
            .map(|object| {
                let mut row = serde_json::Map::new();
                row.insert("id".into(), object.id().as_u64().into());
                for attribute in entity.attributes() {
                    let value = object.get(&attribute.name).unwrap_or(&Value::Null);
                    row.insert(attribute.name.clone(), value.to_json(date_format));
                }
                serde_json::Value::Object(row)
            })
            .collect();
        return serde_json::to_string_pretty(&rows).map_err(|e| CliError::Input {
            path: entity.name().to_string(),
            message: e.to_string(),
        });
    }

    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    let mut header = vec!["id".to_string()];
    header.extend(entity.attributes().iter().map(|a| a.name.clone()));
    table.set_header(header);
    for object in objects {
        let mut row = vec![object.id().as_u64().to_string()];
        row.extend(entity.attributes().iter().map(|attribute| {
            match object.get(&attribute.name).unwrap_or(&Value::Null) {
                Value::Null => "-".to_string(),
                Value::Text(s) => s.clone(),
                Value::Date(d) => date_format.format(d),
                other => other.to_string(),
            }
        }));
        table.add_row(row);
    }
    Ok(table.to_string())
}
