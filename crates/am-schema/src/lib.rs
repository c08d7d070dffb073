#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use am_types::{AttrType, TypeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("cannot parse {what} from {input:?}: {reason}")]
    Parse {
        what: &'static str,
        input: String,
        reason: String,
    },
    #[error("name {name:?} is used more than once in the schema")]
    DuplicateName { name: String },
    #[error("schema must have at least one dimension")]
    NoDimensions,
    #[error(transparent)]
    Type(#[from] TypeError),
}

fn parse_error(what: &'static str, input: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::Parse {
        what,
        input: input.to_owned(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub attr_type: AttrType,
    pub not_null: bool,
    pub default: Option<String>,
    pub compression: Option<String>,
}

impl Attribute {
    #[must_use]
    pub fn new(name: impl Into<String>, attr_type: AttrType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            not_null: false,
            default: None,
            compression: None,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.attr_type)?;
        if self.not_null {
            f.write_str(" NOT NULL")?;
        }
        if let Some(default) = &self.default {
            write!(f, " DEFAULT {default}")?;
        }
        if let Some(compression) = &self.compression {
            write!(f, " COMPRESSION {compression}")?;
        }
        Ok(())
    }
}

/// Parses `name:type [NOT NULL|NULL] [DEFAULT value] [COMPRESSION codec]`.
impl FromStr for Attribute {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = s
            .split_once(':')
            .ok_or_else(|| parse_error("attribute", s, "missing ':' between name and type"))?;
        let name = name.trim();
        if !is_identifier(name) {
            return Err(parse_error("attribute", s, "invalid attribute name"));
        }

        let mut tokens = rest.split_whitespace();
        let type_name = tokens
            .next()
            .ok_or_else(|| parse_error("attribute", s, "missing type"))?;
        let mut attribute = Self::new(name, type_name.parse()?);

        while let Some(token) = tokens.next() {
            match token.to_ascii_uppercase().as_str() {
                "NOT" => match tokens.next() {
                    Some(t) if t.eq_ignore_ascii_case("NULL") => attribute.not_null = true,
                    _ => return Err(parse_error("attribute", s, "expected NULL after NOT")),
                },
                "NULL" => attribute.not_null = false,
                "DEFAULT" => {
                    let value = tokens
                        .next()
                        .ok_or_else(|| parse_error("attribute", s, "missing DEFAULT value"))?;
                    attribute.default = Some(value.to_owned());
                }
                "COMPRESSION" => {
                    let codec = tokens
                        .next()
                        .ok_or_else(|| parse_error("attribute", s, "missing COMPRESSION codec"))?;
                    attribute.compression = Some(codec.to_owned());
                }
                other => {
                    return Err(parse_error(
                        "attribute",
                        s,
                        format!("unexpected token {other:?}"),
                    ));
                }
            }
        }
        Ok(attribute)
    }
}

/// Integer index axis. `high == None` with a `low` is the unbounded `*` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub low: Option<i64>,
    pub high: Option<i64>,
    pub chunk_overlap: Option<i64>,
    pub chunk_length: Option<i64>,
}

impl Dimension {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            low: None,
            high: None,
            chunk_overlap: None,
            chunk_length: None,
        }
    }

    #[must_use]
    pub fn with_range(mut self, low: i64, high: Option<i64>) -> Self {
        self.low = Some(low);
        self.high = high;
        self
    }

    #[must_use]
    pub fn with_chunking(mut self, overlap: i64, length: i64) -> Self {
        self.chunk_overlap = Some(overlap);
        self.chunk_length = Some(length);
        self
    }

    /// Dense `[0, *]` row axis, as produced by `sort`, `uniq` and `unpack`.
    #[must_use]
    pub fn row_axis(name: impl Into<String>) -> Self {
        Self::new(name).with_range(0, None)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        let Some(low) = self.low else {
            return Ok(());
        };
        write!(f, "={low}:")?;
        match self.high {
            Some(high) => write!(f, "{high}")?,
            None => f.write_str("*")?,
        }
        if self.chunk_overlap.is_some() || self.chunk_length.is_some() {
            write!(f, ":{}", render_optional(self.chunk_overlap))?;
            if let Some(length) = self.chunk_length {
                write!(f, ":{length}")?;
            }
        }
        Ok(())
    }
}

fn render_optional(value: Option<i64>) -> String {
    value.map_or_else(|| "?".to_owned(), |v| v.to_string())
}

/// Parses `name[=low:high[:overlap[:length]]]`; `*` and `?` read as unset.
impl FromStr for Dimension {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, range) = match s.split_once('=') {
            Some((name, range)) => (name.trim(), Some(range)),
            None => (s.trim(), None),
        };
        if !is_identifier(name) {
            return Err(parse_error("dimension", s, "invalid dimension name"));
        }

        let mut dimension = Self::new(name);
        let Some(range) = range else {
            return Ok(dimension);
        };

        let parts: Vec<&str> = range.split(':').map(str::trim).collect();
        if parts.len() < 2 || parts.len() > 4 {
            return Err(parse_error(
                "dimension",
                s,
                "expected low:high[:overlap[:length]]",
            ));
        }
        let low = parse_bound(parts[0], s)?
            .ok_or_else(|| parse_error("dimension", s, "low bound must be an integer"))?;
        dimension.low = Some(low);
        dimension.high = parse_bound(parts[1], s)?;
        if let Some(overlap) = parts.get(2) {
            dimension.chunk_overlap = parse_bound(overlap, s)?;
        }
        if let Some(length) = parts.get(3) {
            dimension.chunk_length = parse_bound(length, s)?;
        }
        Ok(dimension)
    }
}

fn parse_bound(token: &str, input: &str) -> Result<Option<i64>, SchemaError> {
    match token {
        "*" | "?" => Ok(None),
        other => other
            .parse::<i64>()
            .map(Some)
            .map_err(|err| parse_error("dimension", input, err.to_string())),
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Array schema: ordered attributes plus ordered dimensions.
///
/// Attribute and dimension names share one namespace; `Schema::new` rejects
/// duplicates across both lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    name: Option<String>,
    attributes: Vec<Attribute>,
    dimensions: Vec<Dimension>,
}

impl Schema {
    pub fn new(
        name: Option<String>,
        attributes: Vec<Attribute>,
        dimensions: Vec<Dimension>,
    ) -> Result<Self, SchemaError> {
        let schema = Self {
            name,
            attributes,
            dimensions,
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.dimensions.is_empty() {
            return Err(SchemaError::NoDimensions);
        }
        let mut seen = BTreeSet::new();
        for name in self.dim_names().into_iter().chain(self.att_names()) {
            if !seen.insert(name.clone()) {
                return Err(SchemaError::DuplicateName { name });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    #[must_use]
    pub fn att_names(&self) -> Vec<String> {
        self.attributes.iter().map(|a| a.name.clone()).collect()
    }

    #[must_use]
    pub fn dim_names(&self) -> Vec<String> {
        self.dimensions.iter().map(|d| d.name.clone()).collect()
    }

    /// Dimension names and attribute names together.
    #[must_use]
    pub fn names(&self) -> BTreeSet<String> {
        self.dim_names()
            .into_iter()
            .chain(self.att_names())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.is_attribute(name) || self.is_dimension(name)
    }

    #[must_use]
    pub fn is_attribute(&self, name: &str) -> bool {
        self.attribute_position(name).is_some()
    }

    #[must_use]
    pub fn is_dimension(&self, name: &str) -> bool {
        self.dimension_position(name).is_some()
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    #[must_use]
    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    #[must_use]
    pub fn attribute_position(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    #[must_use]
    pub fn dimension_position(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name == name)
    }

    /// Declared type of a name; dimensions are always `int64`.
    #[must_use]
    pub fn name_type(&self, name: &str) -> Option<AttrType> {
        if self.is_dimension(name) {
            return Some(AttrType::Int64);
        }
        self.attribute(name).map(|a| a.attr_type)
    }

    /// Every dimension as an `int64 NOT NULL` attribute, in dimension order.
    #[must_use]
    pub fn dims_as_attributes(&self) -> Vec<Attribute> {
        self.dimensions
            .iter()
            .map(|d| Attribute::new(d.name.clone(), AttrType::Int64).not_null())
            .collect()
    }

    fn render(&self, with_name: bool, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.name.as_deref().filter(|_| with_name) {
            f.write_str(name)?;
        }
        let atts: Vec<String> = self.attributes.iter().map(ToString::to_string).collect();
        let dims: Vec<String> = self.dimensions.iter().map(ToString::to_string).collect();
        write!(f, "<{}> [{}]", atts.join(","), dims.join("; "))
    }
}

/// `{}` renders `name<atts> [dims]`; `{:#}` omits the array name.
impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(!f.alternate(), f)
    }
}

impl FromStr for Schema {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let open = s
            .find('<')
            .ok_or_else(|| parse_error("schema", s, "missing '<'"))?;
        let close = s[open..]
            .find('>')
            .map(|pos| pos + open)
            .ok_or_else(|| parse_error("schema", s, "missing '>'"))?;
        let rest = s[close + 1..].trim();
        let dims_body = rest
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .ok_or_else(|| parse_error("schema", s, "dimensions must be enclosed in [...]"))?;

        let name = s[..open].trim();
        let name = (!name.is_empty()).then(|| name.to_owned());

        let atts_body = s[open + 1..close].trim();
        let attributes = if atts_body.is_empty() {
            Vec::new()
        } else {
            atts_body
                .split(',')
                .map(str::parse::<Attribute>)
                .collect::<Result<Vec<_>, _>>()?
        };
        let dimensions = dims_body
            .split([';', ','])
            .filter(|part| !part.trim().is_empty())
            .map(str::parse::<Dimension>)
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(name, attributes, dimensions)
    }
}

/// Pick a name that no given schema uses: `hint` itself, else the first free
/// `hint_1`, `hint_2`, ...
#[must_use]
pub fn new_attribute_label(hint: &str, schemas: &[&Schema]) -> String {
    let taken = |candidate: &str| schemas.iter().any(|s| s.contains(candidate));
    if !taken(hint) {
        return hint.to_owned();
    }
    let mut count = 1_usize;
    loop {
        let candidate = format!("{hint}_{count}");
        if !taken(&candidate) {
            return candidate;
        }
        count += 1;
    }
}
