//! Programs the runtime understands and the tagged results they produce.
//!
//! A [`Script`] variant names the program; its fields are the bindings
//! injected next to the persistent `df` frame. Failures never travel as
//! sentinel strings: they come back as `Err(EngineError::RuntimeExecution)`.

use crate::describe::Summary;
use crate::table::{Record, Table, Value};
use crate::transform::{CoercionPreview, Encoding, ImputeMethod, ImputePreview, MissingRows};

#[derive(Debug, Clone)]
pub enum Script {
    /// Replace the `df` binding with this table.
    Load { table: Table },
    Describe,
    Head { n: usize },
    DropColumn { column: String },
    Impute {
        column: String,
        method: ImputeMethod,
        value: Option<Value>,
    },
    PreviewImpute {
        column: String,
        method: ImputeMethod,
        value: Option<Value>,
        limit: usize,
    },
    Normalize { column: String },
    Encode { column: String },
    EncodeCategoricals,
    PreviewCoerce { column: String, samples: usize },
    Coerce { column: String },
    MissingRows { column: String, limit: usize },
    ToCsv,
}

impl Script {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Load { .. } => "load",
            Self::Describe => "describe",
            Self::Head { .. } => "head",
            Self::DropColumn { .. } => "drop_column",
            Self::Impute { .. } => "impute",
            Self::PreviewImpute { .. } => "preview_impute",
            Self::Normalize { .. } => "normalize",
            Self::Encode { .. } => "encode",
            Self::EncodeCategoricals => "encode_categoricals",
            Self::PreviewCoerce { .. } => "preview_coerce",
            Self::Coerce { .. } => "coerce",
            Self::MissingRows { .. } => "missing_rows",
            Self::ToCsv => "to_csv",
        }
    }

    /// Whether the script rebinds `df`.
    pub fn mutates(&self) -> bool {
        matches!(
            self,
            Self::Load { .. }
                | Self::DropColumn { .. }
                | Self::Impute { .. }
                | Self::Normalize { .. }
                | Self::Encode { .. }
                | Self::EncodeCategoricals
                | Self::Coerce { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub enum ScriptOutput {
    Unit,
    Summary(Summary),
    Records(Vec<Record>),
    /// The full `df` after a mutating script.
    Table(Table),
    Encoded { table: Table, encodings: Vec<Encoding> },
    ImputePreview(ImputePreview),
    CoercionPreview(CoercionPreview),
    MissingRows(MissingRows),
    Csv(Vec<u8>),
}

impl ScriptOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Summary(_) => "summary",
            Self::Records(_) => "records",
            Self::Table(_) => "table",
            Self::Encoded { .. } => "encoded",
            Self::ImputePreview(_) => "impute_preview",
            Self::CoercionPreview(_) => "coercion_preview",
            Self::MissingRows(_) => "missing_rows",
            Self::Csv(_) => "csv",
        }
    }
}
