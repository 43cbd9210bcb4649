//! Key schema service.
//!
//! The decoder does not know which keys a message has. That mapping is
//! data: an [`EditionSchema`] lists, in order, every key an edition
//! exposes and where its bytes live (or how it is derived from other
//! keys). [`SchemaService`] is the lookup boundary the decode engine
//! consumes; [`StandardTables`] is the built-in implementation covering
//! edition 2 with the usual parameter and level lookup tables.

use grib_common::{KeyFlags, ValueKind};
use std::collections::HashMap;

/// How a coded key's bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Big-endian unsigned integer.
    Unsigned,
    /// Sign-magnitude integer: high bit of the first byte is the sign.
    SignMagnitude,
    /// IEEE 754 single precision, big-endian.
    Ieee32,
    /// Raw ASCII text.
    Ascii,
}

/// Derivations the decode engine knows how to evaluate for computed
/// keys. Inputs are keys decoded earlier in schema order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// Parameter short name from discipline/category/number.
    ShortName,
    /// Human-readable level from surface type and value.
    LevelDescription,
    /// Reference time formatted as RFC 3339.
    ReferenceTime,
    /// YYYYMMDD long from the identification date fields.
    DataDate,
    /// HHMM long from the identification time fields.
    DataTime,
    /// Level in conventional units from the first fixed surface fields
    /// (scale factor applied; isobaric surfaces convert Pa to mb).
    Level,
    /// The unpacked data values.
    Values,
}

/// Where a key's value comes from.
#[derive(Debug, Clone)]
pub enum KeySource {
    Coded {
        /// Section number; 0 is the indicator section.
        section: u8,
        /// Byte offset from the start of the section.
        offset: usize,
        /// Width in bytes.
        width: usize,
        encoding: Encoding,
        /// Only decode when the section's template number matches.
        template: Option<u16>,
    },
    Computed(Derivation),
}

/// One key a schema exposes on a message.
#[derive(Debug, Clone)]
pub struct KeySchema {
    pub name: String,
    pub kind: ValueKind,
    pub source: KeySource,
    pub namespace: Option<String>,
    pub flags: KeyFlags,
    pub read_only: bool,
    /// All-bits-one coded bytes decode as a missing value.
    pub can_be_missing: bool,
}

impl KeySchema {
    /// A coded key read from message bytes. Defaults: unsigned encoding,
    /// no template guard, writable, `CODED` flag.
    pub fn coded(name: &str, kind: ValueKind, section: u8, offset: usize, width: usize) -> Self {
        Self {
            name: name.to_string(),
            kind,
            source: KeySource::Coded {
                section,
                offset,
                width,
                encoding: Encoding::Unsigned,
                template: None,
            },
            namespace: None,
            flags: KeyFlags::CODED,
            read_only: false,
            can_be_missing: false,
        }
    }

    /// A computed key derived by the engine. Defaults: read-only,
    /// `COMPUTED` flag.
    pub fn computed(name: &str, kind: ValueKind, derivation: Derivation) -> Self {
        Self {
            name: name.to_string(),
            kind,
            source: KeySource::Computed(derivation),
            namespace: None,
            flags: KeyFlags::COMPUTED | KeyFlags::READ_ONLY,
            read_only: true,
            can_be_missing: false,
        }
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        if let KeySource::Coded { encoding: e, .. } = &mut self.source {
            *e = encoding;
        }
        self
    }

    /// Guard on the owning section's template number; keys with an unmet
    /// guard are simply absent from the decoded tree.
    pub fn template(mut self, template: u16) -> Self {
        if let KeySource::Coded { template: t, .. } = &mut self.source {
            *t = Some(template);
        }
        self.flags |= KeyFlags::OPTIONAL | KeyFlags::EDITION_SPECIFIC;
        self
    }

    pub fn namespace(mut self, ns: &str) -> Self {
        self.namespace = Some(ns.to_string());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self.flags |= KeyFlags::READ_ONLY;
        self
    }

    pub fn can_be_missing(mut self) -> Self {
        self.can_be_missing = true;
        self
    }
}

/// Level description - either static text or a template with a {value}
/// placeholder.
#[derive(Debug, Clone)]
pub enum LevelDescription {
    /// Static description (e.g., "surface", "mean sea level").
    Static(String),
    /// Template with {value} placeholder (e.g., "{value} mb").
    Template(String),
}

impl LevelDescription {
    /// Format the description, substituting placeholders if it's a
    /// template.
    ///
    /// Supported placeholders:
    /// - `{value}` - raw level value
    /// - `{value_mb}` - value converted from Pa to mb (divided by 100)
    pub fn format(&self, value: i64) -> String {
        match self {
            LevelDescription::Static(s) => s.clone(),
            LevelDescription::Template(t) => {
                let result = t.replace("{value}", &value.to_string());
                result.replace("{value_mb}", &(value / 100).to_string())
            }
        }
    }
}

/// The ordered key list and lookup tables for one message edition.
#[derive(Debug, Clone, Default)]
pub struct EditionSchema {
    pub edition: u8,
    keys: Vec<KeySchema>,
    /// (discipline, category, number) -> parameter short name.
    parameters: HashMap<(u8, u8, u8), String>,
    /// level_type -> description pattern.
    levels: HashMap<u8, LevelDescription>,
}

impl EditionSchema {
    pub fn new(edition: u8) -> Self {
        Self {
            edition,
            ..Default::default()
        }
    }

    pub fn push_key(&mut self, key: KeySchema) {
        self.keys.push(key);
    }

    pub fn keys(&self) -> &[KeySchema] {
        &self.keys
    }

    pub fn add_parameter(&mut self, discipline: u8, category: u8, number: u8, name: &str) {
        self.parameters
            .insert((discipline, category, number), name.to_string());
    }

    pub fn add_level(&mut self, level_type: u8, description: LevelDescription) {
        self.levels.insert(level_type, description);
    }

    /// Look up a parameter short name.
    ///
    /// Returns "P{discipline}_{category}_{number}" if not found.
    pub fn parameter_name(&self, discipline: u8, category: u8, number: u8) -> String {
        self.parameters
            .get(&(discipline, category, number))
            .cloned()
            .unwrap_or_else(|| format!("P{}_{}_{}", discipline, category, number))
    }

    /// Look up a level description by type code and value.
    ///
    /// Returns "Level type {type} value {value}" if not found.
    pub fn level_description(&self, level_type: u8, level_value: i64) -> String {
        match self.levels.get(&level_type) {
            Some(desc) => desc.format(level_value),
            None => format!("Level type {} value {}", level_type, level_value),
        }
    }
}

/// Lookup boundary between the decode engine and the per-edition key
/// definitions.
pub trait SchemaService: Send + Sync {
    /// The schema for an edition, or `None` when the edition has no
    /// mapping (the decoder surfaces this as an unsupported edition).
    fn edition_schema(&self, edition: u8) -> Option<&EditionSchema>;
}

/// Built-in schema tables.
///
/// Covers edition 2 out of the box; additional or replacement editions
/// can be registered for specialized streams.
#[derive(Debug, Clone)]
pub struct StandardTables {
    editions: HashMap<u8, EditionSchema>,
}

impl StandardTables {
    pub fn new() -> Self {
        let mut editions = HashMap::new();
        editions.insert(2, edition2_schema());
        Self { editions }
    }

    /// Register or replace the schema for an edition.
    pub fn set_edition(&mut self, schema: EditionSchema) {
        self.editions.insert(schema.edition, schema);
    }

    pub fn edition_mut(&mut self, edition: u8) -> Option<&mut EditionSchema> {
        self.editions.get_mut(&edition)
    }
}

impl Default for StandardTables {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaService for StandardTables {
    fn edition_schema(&self, edition: u8) -> Option<&EditionSchema> {
        self.editions.get(&edition)
    }
}

/// The edition 2 key table.
///
/// Offsets are relative to the owning section's first byte, including
/// the 5-byte section header (4-byte length + section number). Grid,
/// product, and data-representation keys carry template guards, so
/// messages using other templates simply lack those keys.
fn edition2_schema() -> EditionSchema {
    use ValueKind::{Double, Long, String as Str};

    let mut s = EditionSchema::new(2);

    // Section 0: indicator
    s.push_key(
        KeySchema::coded("identifier", Str, 0, 0, 4)
            .encoding(Encoding::Ascii)
            .read_only(),
    );
    s.push_key(KeySchema::coded("discipline", Long, 0, 6, 1).namespace("parameter"));
    s.push_key(KeySchema::coded("edition", Long, 0, 7, 1).namespace("ls").read_only());
    s.push_key(KeySchema::coded("totalLength", Long, 0, 8, 8).read_only());

    // Section 1: identification
    s.push_key(KeySchema::coded("centre", Long, 1, 5, 2).namespace("ls"));
    s.push_key(KeySchema::coded("subCentre", Long, 1, 7, 2));
    s.push_key(KeySchema::coded("tablesVersion", Long, 1, 9, 1));
    s.push_key(KeySchema::coded("localTablesVersion", Long, 1, 10, 1));
    s.push_key(KeySchema::coded("significanceOfReferenceTime", Long, 1, 11, 1).namespace("time"));
    s.push_key(KeySchema::coded("year", Long, 1, 12, 2).namespace("time"));
    s.push_key(KeySchema::coded("month", Long, 1, 14, 1).namespace("time"));
    s.push_key(KeySchema::coded("day", Long, 1, 15, 1).namespace("time"));
    s.push_key(KeySchema::coded("hour", Long, 1, 16, 1).namespace("time"));
    s.push_key(KeySchema::coded("minute", Long, 1, 17, 1).namespace("time"));
    s.push_key(KeySchema::coded("second", Long, 1, 18, 1).namespace("time"));
    s.push_key(KeySchema::coded("productionStatusOfProcessedData", Long, 1, 19, 1));
    s.push_key(KeySchema::coded("typeOfProcessedData", Long, 1, 20, 1));
    s.push_key(KeySchema::computed("dataDate", Long, Derivation::DataDate).namespace("time"));
    s.push_key(KeySchema::computed("dataTime", Long, Derivation::DataTime).namespace("time"));
    s.push_key(
        KeySchema::computed("referenceTime", Str, Derivation::ReferenceTime).namespace("time"),
    );

    // Section 3: grid definition (template 3.0 keys are guarded)
    s.push_key(KeySchema::coded("numberOfDataPoints", Long, 3, 6, 4).namespace("geography").read_only());
    s.push_key(KeySchema::coded("gridDefinitionTemplateNumber", Long, 3, 12, 2).namespace("geography").read_only());
    s.push_key(KeySchema::coded("Ni", Long, 3, 30, 4).namespace("geography").template(0));
    s.push_key(KeySchema::coded("Nj", Long, 3, 34, 4).namespace("geography").template(0));
    s.push_key(
        KeySchema::coded("latitudeOfFirstGridPoint", Long, 3, 46, 4)
            .encoding(Encoding::SignMagnitude)
            .namespace("geography")
            .template(0),
    );
    s.push_key(
        KeySchema::coded("longitudeOfFirstGridPoint", Long, 3, 50, 4)
            .encoding(Encoding::SignMagnitude)
            .namespace("geography")
            .template(0),
    );
    s.push_key(
        KeySchema::coded("latitudeOfLastGridPoint", Long, 3, 55, 4)
            .encoding(Encoding::SignMagnitude)
            .namespace("geography")
            .template(0),
    );
    s.push_key(
        KeySchema::coded("longitudeOfLastGridPoint", Long, 3, 59, 4)
            .encoding(Encoding::SignMagnitude)
            .namespace("geography")
            .template(0),
    );
    s.push_key(KeySchema::coded("iDirectionIncrement", Long, 3, 63, 4).namespace("geography").template(0));
    s.push_key(KeySchema::coded("jDirectionIncrement", Long, 3, 67, 4).namespace("geography").template(0));
    s.push_key(KeySchema::coded("scanningMode", Long, 3, 71, 1).namespace("geography").template(0));

    // Section 4: product definition (template 4.0 keys are guarded)
    s.push_key(KeySchema::coded("productDefinitionTemplateNumber", Long, 4, 7, 2).read_only());
    s.push_key(KeySchema::coded("parameterCategory", Long, 4, 9, 1).namespace("parameter"));
    s.push_key(KeySchema::coded("parameterNumber", Long, 4, 10, 1).namespace("parameter"));
    s.push_key(KeySchema::coded("typeOfGeneratingProcess", Long, 4, 11, 1));
    s.push_key(KeySchema::coded("forecastTime", Long, 4, 18, 4).namespace("time").template(0));
    s.push_key(KeySchema::coded("typeOfFirstFixedSurface", Long, 4, 22, 1).namespace("vertical").template(0));
    s.push_key(
        KeySchema::coded("scaleFactorOfFirstFixedSurface", Long, 4, 23, 1)
            .namespace("vertical")
            .template(0)
            .can_be_missing(),
    );
    s.push_key(
        KeySchema::coded("scaledValueOfFirstFixedSurface", Long, 4, 24, 4)
            .namespace("vertical")
            .template(0)
            .can_be_missing(),
    );
    s.push_key(KeySchema::computed("level", Long, Derivation::Level).namespace("vertical"));
    s.push_key(
        KeySchema::computed("shortName", Str, Derivation::ShortName).namespace("parameter"),
    );
    s.push_key(
        KeySchema::computed("levelDescription", Str, Derivation::LevelDescription)
            .namespace("vertical"),
    );

    // Section 5: data representation (template 5.0 keys are guarded)
    s.push_key(KeySchema::coded("numberOfValues", Long, 5, 5, 4).namespace("data").read_only());
    s.push_key(KeySchema::coded("dataRepresentationTemplateNumber", Long, 5, 9, 2).namespace("data").read_only());
    s.push_key(
        KeySchema::coded("referenceValue", Double, 5, 11, 4)
            .encoding(Encoding::Ieee32)
            .namespace("data")
            .template(0)
            .read_only(),
    );
    s.push_key(
        KeySchema::coded("binaryScaleFactor", Long, 5, 15, 2)
            .encoding(Encoding::SignMagnitude)
            .namespace("data")
            .template(0),
    );
    s.push_key(
        KeySchema::coded("decimalScaleFactor", Long, 5, 17, 2)
            .encoding(Encoding::SignMagnitude)
            .namespace("data")
            .template(0),
    );
    s.push_key(KeySchema::coded("bitsPerValue", Long, 5, 19, 1).namespace("data").template(0));

    // Section 6: bitmap
    s.push_key(KeySchema::coded("bitMapIndicator", Long, 6, 5, 1).namespace("data"));

    // Unpacked data values
    let mut values = KeySchema::computed("values", Double, Derivation::Values).namespace("data");
    values.read_only = false;
    values.flags = KeyFlags::CODED | KeyFlags::COMPUTED;
    s.push_key(values);

    // Parameter short names: (discipline, category, number)
    s.add_parameter(0, 0, 0, "t");
    s.add_parameter(0, 0, 2, "pt");
    s.add_parameter(0, 0, 6, "dpt");
    s.add_parameter(0, 1, 0, "q");
    s.add_parameter(0, 1, 1, "r");
    s.add_parameter(0, 1, 7, "prate");
    s.add_parameter(0, 1, 8, "tp");
    s.add_parameter(0, 2, 2, "u");
    s.add_parameter(0, 2, 3, "v");
    s.add_parameter(0, 2, 8, "w");
    s.add_parameter(0, 2, 10, "vo");
    s.add_parameter(0, 2, 22, "gust");
    s.add_parameter(0, 3, 0, "pres");
    s.add_parameter(0, 3, 1, "msl");
    s.add_parameter(0, 3, 4, "z");
    s.add_parameter(0, 3, 5, "gh");
    s.add_parameter(0, 6, 1, "tcc");
    s.add_parameter(0, 7, 6, "cape");
    s.add_parameter(0, 7, 7, "cin");
    s.add_parameter(0, 19, 0, "vis");

    // Level descriptions by surface type
    s.add_level(1, LevelDescription::Static("surface".to_string()));
    s.add_level(4, LevelDescription::Static("0C isotherm".to_string()));
    s.add_level(7, LevelDescription::Static("tropopause".to_string()));
    s.add_level(100, LevelDescription::Template("{value} mb".to_string()));
    s.add_level(101, LevelDescription::Static("mean sea level".to_string()));
    s.add_level(102, LevelDescription::Template("{value} m above MSL".to_string()));
    s.add_level(103, LevelDescription::Template("{value} m above ground".to_string()));
    s.add_level(106, LevelDescription::Template("{value} m below surface".to_string()));
    s.add_level(200, LevelDescription::Static("entire atmosphere".to_string()));

    s
}
