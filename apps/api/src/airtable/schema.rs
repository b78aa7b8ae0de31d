//! Schema manager. Loads the YAML base description and validates field
//! values by declared type.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use super::client::TableMeta;
use super::Fields;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read schema file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid schema YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unknown table: {0}")]
    UnknownTable(String),
}

/// Differences between the YAML description and the live base.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaDrift {
    /// Configured but absent from the base.
    pub missing_tables: Vec<String>,
    /// Present in the base but not configured.
    pub unconfigured_tables: Vec<String>,
    /// Configured fields the base no longer has, by table.
    pub missing_fields: BTreeMap<String, Vec<String>>,
}

impl SchemaDrift {
    pub fn is_clean(&self) -> bool {
        self.missing_tables.is_empty() && self.unconfigured_tables.is_empty() && self.missing_fields.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    airtable_base: BaseConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseConfig {
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub api_name: Option<String>,
    /// Airtable table id (`tbl...`), used to resolve webhook payloads.
    pub id: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

impl TableConfig {
    fn matches(&self, name: &str) -> bool {
        self.name == name || self.api_name.as_deref() == Some(name) || self.id.as_deref() == Some(name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub api_name: Option<String>,
    /// Airtable field id (`fld...`), used to resolve webhook cell values.
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub options: Vec<String>,
    pub link: Option<LinkConfig>,
    pub description: Option<String>,
}

impl FieldConfig {
    fn matches(&self, name: &str) -> bool {
        self.name == name || self.api_name.as_deref() == Some(name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub table: String,
}

const SEARCHABLE_TYPES: &[&str] = &[
    "singleLineText",
    "multilineText",
    "longText",
    "email",
    "phoneNumber",
];

#[derive(Debug, Clone, Default)]
pub struct SchemaManager {
    base: BaseConfig,
}

impl SchemaManager {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let manager = Self::from_yaml_str(&text)?;
        info!(
            path = %path.display(),
            tables = manager.base.tables.len(),
            "Loaded Airtable schema"
        );
        Ok(manager)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = serde_yaml::from_str(text)?;
        Ok(Self {
            base: file.airtable_base,
        })
    }

    pub fn tables(&self) -> Vec<&str> {
        self.base.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Looks a table up by name, api_name or table id.
    pub fn table_config(&self, table: &str) -> Option<&TableConfig> {
        self.base.tables.iter().find(|t| t.matches(table))
    }

    pub fn fields(&self, table: &str) -> &[FieldConfig] {
        self.table_config(table)
            .map(|t| t.fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn field_config(&self, table: &str, field: &str) -> Option<&FieldConfig> {
        self.fields(table).iter().find(|f| f.matches(field))
    }

    pub fn field_type(&self, table: &str, field: &str) -> Option<&str> {
        self.field_config(table, field).map(|f| f.field_type.as_str())
    }

    pub fn primary_key(&self, table: &str) -> Option<&str> {
        self.fields(table)
            .iter()
            .find(|f| f.is_primary)
            .map(|f| f.name.as_str())
    }

    pub fn searchable_fields(&self, table: &str) -> Vec<String> {
        self.fields(table)
            .iter()
            .filter(|f| SEARCHABLE_TYPES.contains(&f.field_type.as_str()))
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn linked_table(&self, table: &str, field: &str) -> Option<&str> {
        self.field_config(table, field)
            .and_then(|f| f.link.as_ref())
            .map(|l| l.table.as_str())
    }

    pub fn table_api_name<'a>(&'a self, table: &'a str) -> &'a str {
        self.table_config(table)
            .and_then(|t| t.api_name.as_deref())
            .unwrap_or(table)
    }

    pub fn field_api_name<'a>(&'a self, table: &str, field: &'a str) -> &'a str {
        self.field_config(table, field)
            .and_then(|f| f.api_name.as_deref())
            .unwrap_or(field)
    }

    /// Maps an Airtable table id to its configured name.
    pub fn table_name_for_id(&self, table_id: &str) -> Option<&str> {
        self.base
            .tables
            .iter()
            .find(|t| t.id.as_deref() == Some(table_id))
            .map(|t| t.api_name.as_deref().unwrap_or(&t.name))
    }

    /// Maps a field id to its display name within `table`.
    pub fn field_name_for_id(&self, table: &str, field_id: &str) -> Option<&str> {
        self.fields(table)
            .iter()
            .find(|f| f.id.as_deref() == Some(field_id))
            .map(|f| f.name.as_str())
    }

    /// Checks one value against the field's declared type.
    pub fn validate_field_value(&self, table: &str, field: &str, value: &Value) -> Result<(), String> {
        let table_config = self
            .table_config(table)
            .ok_or_else(|| format!("Unknown table: {table}"))?;
        let config = table_config
            .fields
            .iter()
            .find(|f| f.matches(field))
            .ok_or_else(|| format!("Unknown field '{field}' in table '{table}'"))?;

        if value.is_null() {
            return Ok(());
        }

        match config.field_type.as_str() {
            "checkbox" if !value.is_boolean() => Err(format!("Field '{field}' must be a boolean")),
            "number" | "currency" | "percent" | "rating" | "duration" if !value.is_number() => {
                Err(format!("Field '{field}' must be a number"))
            }
            "email" => match value.as_str() {
                Some(s) if s.contains('@') => Ok(()),
                _ => Err(format!("Field '{field}' must be a valid email")),
            },
            "singleSelect" => match value.as_str() {
                Some(s) if config.options.is_empty() || config.options.iter().any(|o| o == s) => Ok(()),
                Some(s) => Err(format!(
                    "Invalid option '{s}' for field '{field}'. Valid options: {}",
                    config.options.join(", ")
                )),
                None => Err(format!("Field '{field}' must be a string")),
            },
            "multipleSelects" | "multipleSelect" => {
                let Some(items) = value.as_array() else {
                    return Err(format!("Field '{field}' must be a list"));
                };
                if config.options.is_empty() {
                    return Ok(());
                }
                let invalid: Vec<String> = items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .filter(|v| !config.options.contains(v))
                    .collect();
                if invalid.is_empty() {
                    Ok(())
                } else {
                    Err(format!(
                        "Invalid options for field '{field}': {}",
                        invalid.join(", ")
                    ))
                }
            }
            "date" | "dateTime" if !value.is_string() => {
                Err(format!("Field '{field}' must be an ISO date string"))
            }
            "multipleRecordLinks" | "link" => match value.as_array() {
                Some(items) if items.iter().all(Value::is_string) => Ok(()),
                _ => Err(format!("Field '{field}' must be a list of record ids")),
            },
            _ => Ok(()),
        }
    }

    /// Validates every field of a record; returns all errors found.
    pub fn validate_record(&self, table: &str, fields: &Fields) -> Vec<String> {
        if self.table_config(table).is_none() {
            return vec![format!("Unknown table: {table}")];
        }
        fields
            .iter()
            .filter_map(|(name, value)| self.validate_field_value(table, name, value).err())
            .collect()
    }

    /// Human-readable description of a table, used in agent prompts.
    pub fn describe_table(&self, table: &str) -> Result<String, SchemaError> {
        let config = self
            .table_config(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))?;

        let mut lines = vec![format!(
            "Table: {} (API: {})",
            config.name,
            config.api_name.as_deref().unwrap_or(&config.name)
        )];
        if let Some(description) = &config.description {
            lines.push(format!("Description: {description}"));
        }
        lines.push("Fields:".to_string());
        for field in &config.fields {
            let mut line = format!("  - {} ({})", field.name, field.field_type);
            if field.is_primary {
                line.push_str(" [PRIMARY]");
            }
            if !field.options.is_empty() {
                line.push_str(&format!(" options: {}", field.options.join(", ")));
            }
            if let Some(link) = &field.link {
                line.push_str(&format!(" -> links to {}", link.table));
            }
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Compares the configured tables against the live base. Tables match
    /// on id when both sides have one, otherwise on display name.
    pub fn drift(&self, live: &[TableMeta]) -> SchemaDrift {
        let mut drift = SchemaDrift::default();
        for table in &self.base.tables {
            let found = live.iter().find(|t| same_table(table, t));
            let Some(found) = found else {
                drift.missing_tables.push(table.name.clone());
                continue;
            };
            let missing: Vec<String> = table
                .fields
                .iter()
                .filter(|f| !found.fields.iter().any(|lf| lf.name == f.name))
                .map(|f| f.name.clone())
                .collect();
            if !missing.is_empty() {
                drift.missing_fields.insert(table.name.clone(), missing);
            }
        }
        drift.unconfigured_tables = live
            .iter()
            .filter(|t| !self.base.tables.iter().any(|table| same_table(table, t)))
            .map(|t| t.name.clone())
            .collect();
        drift
    }

    pub fn describe_all_tables(&self) -> String {
        self.base
            .tables
            .iter()
            .filter_map(|t| self.describe_table(&t.name).ok())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Ids decide when both sides carry one, names otherwise.
fn same_table(config: &TableConfig, live: &TableMeta) -> bool {
    match config.id.as_deref() {
        Some(id) if !id.is_empty() && !live.id.is_empty() => id == live.id,
        _ => config.name == live.name,
    }
}
