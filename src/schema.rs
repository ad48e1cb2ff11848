//! Schema Catalog
//!
//! Tables and columns read from `INFORMATION_SCHEMA`, rendered into the
//! compact text block the model sees and the JSON the UI reads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Base tables and views of the current database.
pub const TABLES_QUERY: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE \
     FROM INFORMATION_SCHEMA.TABLES \
     WHERE TABLE_TYPE IN ('BASE TABLE', 'VIEW') \
     ORDER BY TABLE_SCHEMA, TABLE_NAME";

/// Every column, in ordinal order. Numeric metadata is cast to `INT` so the
/// driver always hands back the same type.
pub const COLUMNS_QUERY: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, DATA_TYPE, IS_NULLABLE, \
     CAST(CHARACTER_MAXIMUM_LENGTH AS INT), CAST(NUMERIC_PRECISION AS INT), CAST(NUMERIC_SCALE AS INT) \
     FROM INFORMATION_SCHEMA.COLUMNS \
     ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub max_length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
}

impl ColumnInfo {
    /// Data type with its length or precision, e.g. `nvarchar(50)`,
    /// `varbinary(MAX)`, `decimal(18,2)`.
    pub fn type_details(&self) -> String {
        match self.data_type.to_lowercase().as_str() {
            "varchar" | "nvarchar" | "char" | "nchar" | "varbinary" | "binary" => {
                match self.max_length {
                    Some(-1) => format!("{}(MAX)", self.data_type),
                    Some(len) => format!("{}({})", self.data_type, len),
                    None => self.data_type.clone(),
                }
            }
            "decimal" | "numeric" => match (self.precision, self.scale) {
                (Some(precision), Some(scale)) => {
                    format!("{}({},{})", self.data_type, precision, scale)
                }
                _ => self.data_type.clone(),
            },
            _ => self.data_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    /// `BASE TABLE` or `VIEW`
    #[serde(rename = "type")]
    pub table_type: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn qualified_name(&self) -> String {
        format!("[{}].[{}]", self.schema, self.name)
    }
}

/// One row of [`TABLES_QUERY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTable {
    pub schema: String,
    pub name: String,
    pub table_type: String,
}

/// One row of [`COLUMNS_QUERY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub table_schema: String,
    pub table_name: String,
    pub column: ColumnInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TablesResponse {
    pub tables: Vec<String>,
}

impl DatabaseSchema {
    /// Joins catalog rows and sorts tables case-insensitively by schema then
    /// name, so the prompt is stable across runs.
    pub fn from_catalog(tables: Vec<CatalogTable>, columns: Vec<CatalogColumn>) -> Self {
        let mut columns_by_table: HashMap<(String, String), Vec<ColumnInfo>> = HashMap::new();
        for row in columns {
            columns_by_table
                .entry((row.table_schema, row.table_name))
                .or_default()
                .push(row.column);
        }

        let mut tables: Vec<TableInfo> = tables
            .into_iter()
            .map(|table| {
                let columns = columns_by_table
                    .remove(&(table.schema.clone(), table.name.clone()))
                    .unwrap_or_default();
                TableInfo {
                    schema: table.schema,
                    name: table.name,
                    table_type: table.table_type,
                    columns,
                }
            })
            .collect();

        tables.sort_by_key(|t| (t.schema.to_lowercase(), t.name.to_lowercase()));
        Self { tables }
    }

    pub fn qualified_names(&self) -> Vec<String> {
        self.tables.iter().map(TableInfo::qualified_name).collect()
    }

    pub fn tables_response(&self) -> TablesResponse {
        TablesResponse {
            tables: self.qualified_names(),
        }
    }

    /// Compact, deterministic schema block for the model prompt.
    pub fn to_prompt_string(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        for table in &self.tables {
            lines.push(format!("{} ({})", table.qualified_name(), table.table_type));
            for column in &table.columns {
                let nullable = if column.is_nullable { "NULL" } else { "NOT NULL" };
                lines.push(format!(
                    "  - {}: {} {}",
                    column.name,
                    column.type_details(),
                    nullable
                ));
            }
            lines.push(String::new());
        }
        lines.join("\n").trim().to_string()
    }
}
