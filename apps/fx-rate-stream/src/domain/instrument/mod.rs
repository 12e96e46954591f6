//! Instrument Catalog
//!
//! The fixed universe of quotable currencies, their static metadata, and
//! the board of current reference values.
//!
//! # Design
//!
//! The catalog is loaded once at startup and never mutated. The
//! [`RateBoard`] holds one cell per catalog instrument; the key set is
//! fixed at construction so readers only ever synchronize with the write
//! to the single cell they read.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Catalog bundled with the binary.
const BUNDLED_CATALOG: &str = include_str!("../../../data/instruments.json");

// =============================================================================
// Types
// =============================================================================

/// Canonical (trimmed, uppercase) instrument code, e.g. `ZAR`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    /// Parse and canonicalize an instrument code.
    ///
    /// Returns `None` for codes that are empty after trimming.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        if code.is_empty() {
            return None;
        }
        Some(Self(code.to_uppercase()))
    }

    /// The canonical code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for InstrumentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Static, display-only metadata for an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentMetadata {
    /// Currency display name.
    pub name: String,
    /// Issuing country or monetary union.
    pub country: String,
    /// Geographic region.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// A catalog entry.
#[derive(Debug, Clone)]
pub struct Instrument {
    /// Canonical identifier.
    pub id: InstrumentId,
    /// Static metadata.
    pub metadata: InstrumentMetadata,
    /// Reference value the rate board starts from, if known.
    pub seed_rate: Option<Decimal>,
}

// =============================================================================
// Catalog File Format
// =============================================================================

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default = "default_base")]
    base: String,
    instruments: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    code: String,
    name: String,
    country: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    rate: Option<f64>,
}

fn default_base() -> String {
    "USD".to_string()
}

// =============================================================================
// Instrument Catalog
// =============================================================================

/// Immutable set of known instruments, keyed by canonical identifier.
///
/// # Example
///
/// ```rust
/// use fx_rate_stream::domain::instrument::{InstrumentCatalog, InstrumentId};
///
/// let catalog = InstrumentCatalog::bundled().unwrap();
/// let zar = InstrumentId::parse("zar").unwrap();
///
/// assert!(catalog.contains(&zar));
/// assert_eq!(catalog.base(), "USD");
/// ```
#[derive(Debug, Clone)]
pub struct InstrumentCatalog {
    base: String,
    instruments: BTreeMap<InstrumentId, Instrument>,
}

impl InstrumentCatalog {
    /// Load the catalog bundled with the binary.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the bundled data is invalid.
    pub fn bundled() -> Result<Self, CatalogError> {
        Self::from_json(BUNDLED_CATALOG)
    }

    /// Load a catalog from a JSON file on disk.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the file cannot be read or is invalid.
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Io(path.display().to_string(), e.to_string()))?;
        Self::from_json(&raw)
    }

    /// Parse a catalog from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` on malformed JSON, empty or duplicate codes,
    /// unrepresentable rates, or an empty instrument list.
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            serde_json::from_str(raw).map_err(|e| CatalogError::Parse(e.to_string()))?;

        let mut instruments = BTreeMap::new();
        for entry in file.instruments {
            let id = InstrumentId::parse(&entry.code).ok_or(CatalogError::EmptyCode)?;

            let seed_rate = entry
                .rate
                .map(|r| {
                    Decimal::try_from(r).map_err(|_| CatalogError::InvalidRate(id.to_string(), r))
                })
                .transpose()?;

            let instrument = Instrument {
                id: id.clone(),
                metadata: InstrumentMetadata {
                    name: entry.name,
                    country: entry.country,
                    region: entry.region,
                },
                seed_rate,
            };

            if instruments.insert(id.clone(), instrument).is_some() {
                return Err(CatalogError::Duplicate(id.to_string()));
            }
        }

        if instruments.is_empty() {
            return Err(CatalogError::Empty);
        }

        let base = InstrumentId::parse(&file.base)
            .map_or_else(default_base, |b| b.as_str().to_string());

        Ok(Self { base, instruments })
    }

    /// Base currency all rates are quoted against.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Number of instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the catalog is empty (never true for a loaded catalog).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Whether the identifier is part of the catalog.
    #[must_use]
    pub fn contains(&self, id: &InstrumentId) -> bool {
        self.instruments.contains_key(id)
    }

    /// All identifiers as a set.
    #[must_use]
    pub fn identifiers(&self) -> HashSet<InstrumentId> {
        self.instruments.keys().cloned().collect()
    }

    /// Iterate instruments in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.values()
    }

    /// Static metadata for an instrument.
    #[must_use]
    pub fn metadata(&self, id: &InstrumentId) -> Option<&InstrumentMetadata> {
        self.instruments.get(id).map(|i| &i.metadata)
    }

    /// Identifiers from `ids` that are not in the catalog, sorted and deduplicated.
    #[must_use]
    pub fn unknown<'a>(&self, ids: impl IntoIterator<Item = &'a InstrumentId>) -> Vec<InstrumentId> {
        let mut unknown: Vec<_> = ids
            .into_iter()
            .filter(|id| !self.contains(id))
            .cloned()
            .collect();
        unknown.sort();
        unknown.dedup();
        unknown
    }
}

// =============================================================================
// Rate Board
// =============================================================================

/// Current reference value for every catalog instrument.
///
/// Written only by the broadcast engine; read by sessions building catch-up
/// views. Each cell has its own lock.
#[derive(Debug)]
pub struct RateBoard {
    cells: HashMap<InstrumentId, RwLock<Option<Decimal>>>,
}

impl RateBoard {
    /// Create a board seeded from the catalog's seed rates.
    #[must_use]
    pub fn seeded(catalog: &InstrumentCatalog) -> Self {
        let cells = catalog
            .iter()
            .map(|i| (i.id.clone(), RwLock::new(i.seed_rate)))
            .collect();
        Self { cells }
    }

    /// Current value of an instrument (`None` if unknown or never priced).
    #[must_use]
    pub fn current(&self, id: &InstrumentId) -> Option<Decimal> {
        self.cells.get(id).and_then(|cell| *cell.read())
    }

    /// Replace the current value of an instrument.
    ///
    /// Returns `false` if the instrument is not on the board.
    pub fn publish(&self, id: &InstrumentId, value: Option<Decimal>) -> bool {
        self.cells.get(id).is_some_and(|cell| {
            *cell.write() = value;
            true
        })
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Catalog loading errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Catalog file could not be read.
    #[error("failed to read catalog {0}: {1}")]
    Io(String, String),

    /// Catalog JSON is malformed.
    #[error("invalid catalog: {0}")]
    Parse(String),

    /// An entry has an empty code.
    #[error("catalog entry has an empty code")]
    EmptyCode,

    /// The same code appears twice.
    #[error("duplicate instrument in catalog: {0}")]
    Duplicate(String),

    /// A seed rate cannot be represented as a decimal.
    #[error("invalid seed rate for {0}: {1}")]
    InvalidRate(String, f64),

    /// The catalog lists no instruments.
    #[error("catalog contains no instruments")]
    Empty,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::str::FromStr;

    use super::*;

    fn id(code: &str) -> InstrumentId {
        InstrumentId::parse(code).unwrap()
    }

    #[test]
    fn instrument_id_is_canonical() {
        assert_eq!(id(" zar ").as_str(), "ZAR");
        assert_eq!(id("Ngn"), id("NGN"));
        assert!(InstrumentId::parse("   ").is_none());
    }

    #[test]
    fn bundled_catalog_loads() {
        let catalog = InstrumentCatalog::bundled().unwrap();

        assert_eq!(catalog.base(), "USD");
        assert!(catalog.len() > 40);
        assert!(catalog.contains(&id("ZAR")));
        assert!(catalog.contains(&id("NGN")));
        assert!(!catalog.contains(&id("XXX")));
    }

    #[test]
    fn metadata_lookup() {
        let catalog = InstrumentCatalog::bundled().unwrap();
        let meta = catalog.metadata(&id("KES")).unwrap();

        assert_eq!(meta.name, "Kenyan Shilling");
        assert_eq!(meta.country, "Kenya");
        assert!(catalog.metadata(&id("XXX")).is_none());
    }

    #[test]
    fn codes_are_uppercased_on_load() {
        let catalog = InstrumentCatalog::from_json(
            r#"{"instruments":[{"code":"zar","name":"Rand","country":"South Africa","rate":18.5}]}"#,
        )
        .unwrap();

        assert!(catalog.contains(&id("ZAR")));
        assert_eq!(catalog.base(), "USD");
    }

    #[test]
    fn duplicate_codes_rejected() {
        let err = InstrumentCatalog::from_json(
            r#"{"instruments":[
                {"code":"XOF","name":"CFA","country":"A"},
                {"code":"xof","name":"CFA","country":"B"}
            ]}"#,
        )
        .unwrap_err();

        assert!(matches!(err, CatalogError::Duplicate(code) if code == "XOF"));
    }

    #[test]
    fn empty_catalog_rejected() {
        let err = InstrumentCatalog::from_json(r#"{"instruments":[]}"#).unwrap_err();
        assert!(matches!(err, CatalogError::Empty));
    }

    #[test]
    fn empty_code_rejected() {
        let err = InstrumentCatalog::from_json(
            r#"{"instruments":[{"code":"  ","name":"?","country":"?"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::EmptyCode));
    }

    #[test]
    fn malformed_json_rejected() {
        let err = InstrumentCatalog::from_json("{not json").unwrap_err();
        assert!(matches!(err, CatalogError::Parse(_)));
    }

    #[test]
    fn load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"base":"usd","instruments":[{{"code":"GHS","name":"Cedi","country":"Ghana","rate":10.85}}]}}"#
        )
        .unwrap();

        let catalog = InstrumentCatalog::from_path(file.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.base(), "USD");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = InstrumentCatalog::from_path(Path::new("/nonexistent/catalog.json")).unwrap_err();
        assert!(matches!(err, CatalogError::Io(..)));
    }

    #[test]
    fn unknown_is_sorted_and_deduplicated() {
        let catalog = InstrumentCatalog::bundled().unwrap();
        let ids = [id("YYY"), id("ZAR"), id("XXX"), id("YYY")];

        assert_eq!(catalog.unknown(&ids), vec![id("XXX"), id("YYY")]);
    }

    #[test]
    fn board_seeded_from_catalog() {
        let catalog = InstrumentCatalog::bundled().unwrap();
        let board = RateBoard::seeded(&catalog);

        assert_eq!(
            board.current(&id("ZAR")),
            Some(Decimal::from_str("17.49").unwrap())
        );
        // Listed without a rate
        assert_eq!(board.current(&id("MRO")), None);
        assert_eq!(board.current(&id("XXX")), None);
    }

    #[test]
    fn board_publish_only_known_cells() {
        let catalog = InstrumentCatalog::bundled().unwrap();
        let board = RateBoard::seeded(&catalog);
        let value = Some(Decimal::new(18_000_001, 6));

        assert!(board.publish(&id("ZAR"), value));
        assert_eq!(board.current(&id("ZAR")), value);
        assert!(!board.publish(&id("XXX"), value));
    }
}
