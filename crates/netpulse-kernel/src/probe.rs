//! Source probe contract — the capability surface exposed by transports.
//!
//! A probe read never returns a Rust error: transport failures are part of
//! the collection domain and are expressed as [`ProbeOutcome`] values that
//! drive the per-item status machine. Only the outcome taxonomy below exists;
//! anything else a transport wants to say must be folded into it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// Origin of a collection item's data.
///
/// Numeric codes are stable and match the persisted representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SourceKind {
    /// Server-internal metric (status, queue depths, ...).
    Internal = 0,
    /// Native monitoring agent parameter.
    NativeAgent = 1,
    /// SNMP GET against the node.
    Snmp = 2,
    /// CheckPoint firewall SNMP variant.
    CheckpointSnmp = 3,
    /// Value pushed by an external producer; never polled by the core.
    Push = 4,
    /// Windows performance counter, synthesized into an agent parameter.
    WinPerf = 5,
    /// SM-CLP management processor query.
    Smclp = 6,
    /// Command executed over SSH through a proxy agent.
    Ssh = 7,
    /// Script executed by the target's script engine.
    Script = 8,
}

impl SourceKind {
    /// Stable numeric code used in persisted state and events.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a persisted numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Internal),
            1 => Some(Self::NativeAgent),
            2 => Some(Self::Snmp),
            3 => Some(Self::CheckpointSnmp),
            4 => Some(Self::Push),
            5 => Some(Self::WinPerf),
            6 => Some(Self::Smclp),
            7 => Some(Self::Ssh),
            8 => Some(Self::Script),
            _ => None,
        }
    }

    /// Human-readable label used in event payloads.
    pub fn label(self) -> &'static str {
        match self {
            Self::Internal => "Internal",
            Self::NativeAgent => "Native Agent",
            Self::Snmp => "SNMP",
            Self::CheckpointSnmp => "CheckPoint SNMP",
            Self::Push => "Push",
            Self::WinPerf => "WinPerf",
            Self::Smclp => "SMCLP",
            Self::Ssh => "SSH",
            Self::Script => "Script",
        }
    }
}

// ---------------------------------------------------------------------------
// ProbeOutcome
// ---------------------------------------------------------------------------

/// Result classification of a single probe read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeOutcome {
    /// A value was obtained.
    Success,
    /// The source answered but the read failed; the item stays in service.
    CollectionError,
    /// The metric exists but the requested instance does not.
    NoSuchInstance,
    /// The source could not be reached; no status change.
    CommError,
    /// The source declared the metric unavailable; the item is demoted.
    NotSupported,
    /// Nothing to do for this item on this target (e.g. a non-aggregating
    /// cluster item); the poll completes silently.
    Ignore,
}

// ---------------------------------------------------------------------------
// Collected data
// ---------------------------------------------------------------------------

/// One column of a collected table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    pub display_name: String,
}

impl TableColumn {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
        }
    }
}

/// A collected table: column metadata plus string-valued rows.
///
/// The core treats cell contents as opaque; only column metadata is touched
/// (display names are rewritten from the item's column definitions after a
/// successful table read).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTable {
    pub columns: Vec<TableColumn>,
    pub rows: Vec<Vec<String>>,
}

impl DataTable {
    pub fn new(columns: Vec<TableColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Rewrite column display names from the given definitions, matched by
    /// column name (case-insensitive). Unknown definitions are ignored.
    pub fn update_result_columns(&mut self, definitions: &[TableColumn]) {
        for def in definitions {
            if let Some(col) = self
                .columns
                .iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(&def.name))
            {
                col.display_name = def.display_name.clone();
            }
        }
    }
}

/// The datum produced by a successful probe read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectedData {
    Value(String),
    Table(DataTable),
}

impl CollectedData {
    pub fn as_value(&self) -> Option<&str> {
        match self {
            Self::Value(v) => Some(v),
            Self::Table(_) => None,
        }
    }

    pub fn as_table(&self) -> Option<&DataTable> {
        match self {
            Self::Value(_) => None,
            Self::Table(t) => Some(t),
        }
    }
}

/// Outcome plus optional datum of one probe read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReading {
    pub outcome: ProbeOutcome,
    pub data: Option<CollectedData>,
}

impl ProbeReading {
    pub fn success(value: impl Into<String>) -> Self {
        Self {
            outcome: ProbeOutcome::Success,
            data: Some(CollectedData::Value(value.into())),
        }
    }

    pub fn table(table: DataTable) -> Self {
        Self {
            outcome: ProbeOutcome::Success,
            data: Some(CollectedData::Table(table)),
        }
    }

    pub fn of(outcome: ProbeOutcome) -> Self {
        Self {
            outcome,
            data: None,
        }
    }

    pub fn not_supported() -> Self {
        Self::of(ProbeOutcome::NotSupported)
    }

    pub fn comm_error() -> Self {
        Self::of(ProbeOutcome::CommError)
    }

    pub fn ignore() -> Self {
        Self::of(ProbeOutcome::Ignore)
    }
}

// ---------------------------------------------------------------------------
// SourceProbe
// ---------------------------------------------------------------------------

/// Per-source read routines implemented by monitored objects.
///
/// Every method defaults to [`ProbeOutcome::NotSupported`], so an object
/// class only implements the transports it actually carries. Implementations
/// must not call back into the requesting collection item.
#[async_trait]
pub trait SourceProbe: Send + Sync {
    /// Read a server-internal metric.
    async fn read_internal(&self, metric: &str) -> ProbeReading {
        let _ = metric;
        ProbeReading::not_supported()
    }

    /// Read a native agent parameter. Also used for synthesized WinPerf and
    /// SSH parameters.
    async fn read_agent(&self, parameter: &str) -> ProbeReading {
        let _ = parameter;
        ProbeReading::not_supported()
    }

    /// SNMP read. A `port` of 0 means the node default; `raw_interpretation`
    /// forces integer interpretation of raw SNMP output.
    async fn read_snmp(&self, port: u16, raw_interpretation: bool, oid: &str) -> ProbeReading {
        let _ = (port, raw_interpretation, oid);
        ProbeReading::not_supported()
    }

    /// CheckPoint SNMP variant read.
    async fn read_checkpoint_snmp(&self, oid: &str) -> ProbeReading {
        let _ = oid;
        ProbeReading::not_supported()
    }

    /// SM-CLP property read.
    async fn read_smclp(&self, property: &str) -> ProbeReading {
        let _ = property;
        ProbeReading::not_supported()
    }

    /// Run a named script through the target's script engine.
    async fn read_script(&self, script: &str) -> ProbeReading {
        let _ = script;
        ProbeReading::not_supported()
    }

    /// Read a table from the native agent.
    async fn read_agent_table(&self, name: &str) -> ProbeReading {
        let _ = name;
        ProbeReading::not_supported()
    }

    /// Read a table over SNMP.
    async fn read_snmp_table(&self, port: u16, name: &str) -> ProbeReading {
        let _ = (port, name);
        ProbeReading::not_supported()
    }
}

/// Escape a string for embedding in a synthesized agent parameter.
///
/// Agent parameter grammar quotes arguments with `"`; embedded quotes are
/// doubled.
pub fn escape_agent_string(s: &str) -> String {
    s.replace('"', "\"\"")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
