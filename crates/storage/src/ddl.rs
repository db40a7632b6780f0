//! Table DDL model and key-shape validation.
//!
//! Contract:
//! - a partition key carries exactly one quantum component, in the last slot;
//! - the local key is a superset of the partition key's direct field
//!   references and ends with the quantum's base field;
//! - DDLs are immutable once activated and are shared by handle.

use serde::{Deserialize, Serialize};
use tfq_common::{Result, TfqError};

/// Scalar column types supported by time-series tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string.
    Varchar,
    /// Signed 64-bit integer.
    Sint64,
    /// IEEE-754 double.
    Double,
    /// Millisecond timestamp.
    Timestamp,
    /// Boolean.
    Boolean,
}

impl FieldType {
    /// Lowercase SQL-facing name of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Varchar => "varchar",
            Self::Sint64 => "sint64",
            Self::Double => "double",
            Self::Timestamp => "timestamp",
            Self::Boolean => "boolean",
        }
    }
}

/// One declared table column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Column name.
    pub name: String,
    /// Declared scalar type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the column admits nulls.
    #[serde(default)]
    pub nullable: bool,
}

/// Time unit of a quantum function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantumUnit {
    /// Seconds.
    #[serde(rename = "s")]
    Second,
    /// Minutes.
    #[serde(rename = "m")]
    Minute,
    /// Hours.
    #[serde(rename = "h")]
    Hour,
    /// Days.
    #[serde(rename = "d")]
    Day,
}

impl QuantumUnit {
    /// Milliseconds in one unit.
    pub fn millis(self) -> u64 {
        match self {
            Self::Second => 1_000,
            Self::Minute => 60_000,
            Self::Hour => 3_600_000,
            Self::Day => 86_400_000,
        }
    }

    /// SQL spelling of the unit.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Second => "s",
            Self::Minute => "m",
            Self::Hour => "h",
            Self::Day => "d",
        }
    }
}

/// One ordered component of a partition key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KeyComponent {
    /// Direct reference to a declared field.
    Param {
        /// Referenced field name.
        field: String,
    },
    /// `quantum(field, every, unit)` bucketing a timestamp field.
    Quantum {
        /// Base timestamp field.
        field: String,
        /// Bucket width in units.
        every: u64,
        /// Bucket unit.
        unit: QuantumUnit,
    },
}

impl KeyComponent {
    /// Field name this component reads.
    pub fn field(&self) -> &str {
        match self {
            Self::Param { field } | Self::Quantum { field, .. } => field,
        }
    }
}

/// Resolved view of a partition key's quantum component.
#[derive(Debug, Clone, Copy)]
pub struct Quantum<'a> {
    /// Base timestamp field.
    pub field: &'a str,
    /// Bucket width in units.
    pub every: u64,
    /// Bucket unit.
    pub unit: QuantumUnit,
}

impl Quantum<'_> {
    /// Bucket width in milliseconds.
    pub fn bucket_ms(&self) -> i64 {
        (self.every * self.unit.millis()) as i64
    }

    /// Round a timestamp down to its bucket origin.
    pub fn floor(&self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.bucket_ms())
    }

    /// Ordered bucket boundaries strictly between `lo` and `hi`.
    pub fn boundaries_between(&self, lo: i64, hi: i64) -> Vec<i64> {
        let step = self.bucket_ms();
        let mut next = self.floor(lo) + step;
        let mut out = Vec::new();
        while next < hi {
            out.push(next);
            next += step;
        }
        out
    }
}

/// Immutable table description registered at activation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDdl {
    /// Table name.
    pub name: String,
    /// Ordered declared columns.
    pub fields: Vec<FieldDef>,
    /// Ordered partition-key components; placement key.
    pub partition_key: Vec<KeyComponent>,
    /// Ordered local-key field references; intra-partition ordering key.
    pub local_key: Vec<String>,
}

impl TableDdl {
    /// Look up a declared column.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared type of a column, or a planning error for unknown names.
    pub fn field_type(&self, name: &str) -> Result<FieldType> {
        self.field(name).map(|f| f.field_type).ok_or_else(|| {
            TfqError::Planning(format!("unknown column '{}' in table '{}'", name, self.name))
        })
    }

    /// The partition key's quantum component.
    pub fn quantum(&self) -> Result<Quantum<'_>> {
        self.partition_key
            .iter()
            .find_map(|c| match c {
                KeyComponent::Quantum { field, every, unit } => Some(Quantum {
                    field,
                    every: *every,
                    unit: *unit,
                }),
                KeyComponent::Param { .. } => None,
            })
            .ok_or_else(|| {
                TfqError::InvalidConfig(format!(
                    "table '{}' has no quantum partition-key component",
                    self.name
                ))
            })
    }

    /// Direct (non-quantum) partition-key field names, in key order.
    pub fn partition_params(&self) -> Vec<&str> {
        self.partition_key
            .iter()
            .filter_map(|c| match c {
                KeyComponent::Param { field } => Some(field.as_str()),
                KeyComponent::Quantum { .. } => None,
            })
            .collect()
    }

    /// Validate the declared key shapes.
    ///
    /// Checked here rather than at query time so every downstream consumer
    /// can rely on the quantum being present, unique, and trailing.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(TfqError::InvalidConfig(format!(
                "table '{}' declares no columns",
                self.name
            )));
        }
        for (i, f) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|g| g.name == f.name) {
                return Err(TfqError::InvalidConfig(format!(
                    "table '{}' declares column '{}' more than once",
                    self.name, f.name
                )));
            }
        }

        if self.partition_key.is_empty() {
            return Err(TfqError::InvalidConfig(format!(
                "table '{}' has an empty partition key",
                self.name
            )));
        }
        let quanta = self
            .partition_key
            .iter()
            .filter(|c| matches!(c, KeyComponent::Quantum { .. }))
            .count();
        if quanta != 1 {
            return Err(TfqError::InvalidConfig(format!(
                "table '{}' must declare exactly one quantum component, found {quanta}",
                self.name
            )));
        }
        if !matches!(
            self.partition_key.last(),
            Some(KeyComponent::Quantum { .. })
        ) {
            return Err(TfqError::InvalidConfig(format!(
                "table '{}' must declare its quantum component last in the partition key",
                self.name
            )));
        }
        for comp in &self.partition_key {
            let field = self.field(comp.field()).ok_or_else(|| {
                TfqError::InvalidConfig(format!(
                    "table '{}' partition key references unknown column '{}'",
                    self.name,
                    comp.field()
                ))
            })?;
            if let KeyComponent::Quantum { every, .. } = comp {
                if *every == 0 {
                    return Err(TfqError::InvalidConfig(format!(
                        "table '{}' quantum width must be positive",
                        self.name
                    )));
                }
                if field.field_type != FieldType::Timestamp {
                    return Err(TfqError::InvalidConfig(format!(
                        "table '{}' quantum column '{}' must be a timestamp",
                        self.name, field.name
                    )));
                }
            }
        }

        if self.local_key.is_empty() {
            return Err(TfqError::InvalidConfig(format!(
                "table '{}' has an empty local key",
                self.name
            )));
        }
        for name in &self.local_key {
            if self.field(name).is_none() {
                return Err(TfqError::InvalidConfig(format!(
                    "table '{}' local key references unknown column '{name}'",
                    self.name
                )));
            }
        }
        for param in self.partition_params() {
            if !self.local_key.iter().any(|k| k == param) {
                return Err(TfqError::InvalidConfig(format!(
                    "table '{}' local key must cover partition-key field '{param}'",
                    self.name
                )));
            }
        }
        let quantum_field = self.quantum()?.field.to_string();
        if self.local_key.last() != Some(&quantum_field) {
            return Err(TfqError::InvalidConfig(format!(
                "table '{}' local key must end with quantum column '{quantum_field}'",
                self.name
            )));
        }
        Ok(())
    }
}
