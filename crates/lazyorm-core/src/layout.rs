//! Column layouts for mappings that do not map one field to one column.
//!
//! [`SingleTable`] stores every variant of an entity in one table. A
//! discriminator column names the variant of each row; each variant owns
//! some columns, and a row leaves the columns of the other variants NULL.
//!
//! [`Embedded`] values have no table or identity of their own. They are
//! stored inline in their owner's row as `<prefix>_<field>` columns.

use crate::error::OrmError;
use crate::types::{Row, Value};

/// One variant of a [`SingleTable`] layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variant {
    /// Value stored in the discriminator column
    pub tag: &'static str,
    /// Columns only this variant uses
    pub columns: &'static [&'static str],
}

/// Single-table inheritance layout.
///
/// Columns are laid out as: shared columns, the discriminator, then every
/// variant's own columns in declaration order.
#[derive(Debug, Clone)]
pub struct SingleTable {
    discriminator: &'static str,
    shared: &'static [&'static str],
    variants: &'static [Variant],
    columns: Vec<&'static str>,
}

impl SingleTable {
    pub fn new(
        discriminator: &'static str,
        shared: &'static [&'static str],
        variants: &'static [Variant],
    ) -> Self {
        let columns = shared
            .iter()
            .copied()
            .chain(std::iter::once(discriminator))
            .chain(variants.iter().flat_map(|v| v.columns.iter().copied()))
            .collect();
        Self {
            discriminator,
            shared,
            variants,
            columns,
        }
    }

    /// Every non-key column, for [`Mapping::columns`](crate::Mapping::columns)
    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    pub fn discriminator(&self) -> &'static str {
        self.discriminator
    }

    pub fn variants(&self) -> &'static [Variant] {
        self.variants
    }

    /// The variant a row was stored as
    pub fn variant_of(&self, row: &Row) -> Result<&'static Variant, OrmError> {
        let tag = row.get_str(self.discriminator)?;
        self.variants
            .iter()
            .find(|v| v.tag == tag)
            .ok_or_else(|| {
                OrmError::decode(self.discriminator, format!("unknown variant '{}'", tag))
            })
    }

    /// Values for [`columns`](Self::columns): `shared`, then `tag`, then
    /// `own` in the columns of `tag` and NULL in every other variant's.
    pub fn encode(&self, tag: &str, shared: Vec<Value>, mut own: Vec<Value>) -> Vec<Value> {
        let mut values = Vec::with_capacity(self.columns.len());
        values.extend(shared);
        values.push(Value::from(tag));

        for variant in self.variants {
            if variant.tag == tag {
                values.append(&mut own);
            } else {
                values.extend(variant.columns.iter().map(|_| Value::Null));
            }
        }
        values
    }

    /// Number of shared columns ahead of the discriminator
    pub fn shared_len(&self) -> usize {
        self.shared.len()
    }
}

/// A value object stored as several columns of its owner's row.
pub trait Embedded: Sized {
    /// Field names; the stored columns are `<prefix>_<field>`
    const FIELDS: &'static [&'static str];

    /// Read the value from the `<prefix>_*` columns of `row`
    fn read(row: &Row, prefix: &str) -> Result<Self, OrmError>;

    /// Values for [`FIELDS`](Self::FIELDS), in order
    fn write(&self) -> Vec<Value>;
}

/// Name of the column holding `field` of a value embedded under `prefix`
pub fn embedded_column(prefix: &str, field: &str) -> String {
    format!("{}_{}", prefix, field)
}

/// Column names for an [`Embedded`] type under `prefix`
pub fn embedded_columns<T: Embedded>(prefix: &str) -> Vec<String> {
    T::FIELDS
        .iter()
        .map(|field| embedded_column(prefix, field))
        .collect()
}
