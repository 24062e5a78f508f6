//! Per-chunk type schema
//!
//! The metadata record is a string table followed by a tree of elements.
//! Only `class` and `field` elements carry information the reader needs;
//! everything else (annotations, settings, regions) is walked and dropped.

use std::collections::HashMap;
use std::io::{Read, Seek};

use crate::domain::FormatError;
use crate::jfr::cursor::BinaryCursor;

/// One field of a recorded type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JfrField {
    pub name: String,
    /// Type id of the field's type
    pub type_id: u64,
    /// The value is stored as a constant pool reference
    pub constant_pool: bool,
    pub dimension: i32,
}

/// A type declared by the metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JfrClass {
    pub id: u64,
    pub name: String,
    pub super_type: Option<String>,
    pub simple_type: bool,
    pub fields: Vec<JfrField>,
}

impl JfrClass {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&JfrField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Type tables of the chunk currently being read.
#[derive(Debug, Default)]
pub struct Schema {
    /// Pool types (declared without a super type), by id
    types: HashMap<u64, JfrClass>,
    /// Every declared type, by name
    types_by_name: HashMap<String, JfrClass>,
}

impl Schema {
    pub fn clear(&mut self) {
        self.types.clear();
        self.types_by_name.clear();
    }

    #[must_use]
    pub fn pool_type(&self, id: u64) -> Option<&JfrClass> {
        self.types.get(&id)
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&JfrClass> {
        self.types_by_name.get(name)
    }

    /// Type id for a name, if the chunk declares it.
    #[must_use]
    pub fn type_id(&self, name: &str) -> Option<u64> {
        self.types_by_name.get(name).map(|c| c.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &JfrClass> {
        self.types_by_name.values()
    }

    fn insert(&mut self, class: JfrClass) {
        if class.super_type.is_none() {
            self.types.insert(class.id, class.clone());
        }
        self.types_by_name.insert(class.name.clone(), class);
    }
}

/// Parse the metadata record at the cursor's current position into `schema`.
///
/// # Errors
/// Returns an error on malformed strings, bad indices or truncated data
pub fn read_metadata<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    schema: &mut Schema,
) -> Result<(), FormatError> {
    let record_start = cursor.position();
    let size = cursor.varint()?;
    cursor.seek(record_start)?;
    cursor.ensure(size as usize)?;

    cursor.varint()?; // size
    cursor.varlong()?; // type
    cursor.varlong()?; // start
    cursor.varlong()?; // duration
    cursor.varlong()?; // metadata id

    let no_pool = HashMap::new();
    let count = cursor.varint()?;
    let count = cursor.bounded_count(u64::from(count), "metadata string count")?;
    let mut strings = Vec::with_capacity(count);
    for _ in 0..count {
        strings.push(cursor.string(&no_pool)?.unwrap_or_default());
    }

    read_element(cursor, &strings, schema, None)?;
    Ok(())
}

fn lookup<'a>(strings: &'a [String], index: u32) -> Result<&'a str, FormatError> {
    strings.get(index as usize).map(String::as_str).ok_or_else(|| {
        FormatError::InvalidFormat(format!("metadata string index {index} out of range"))
    })
}

/// Reads one element and its children. Fields are attached to the closest
/// enclosing class.
fn read_element<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    strings: &[String],
    schema: &mut Schema,
    parent: Option<&mut JfrClass>,
) -> Result<(), FormatError> {
    let name = lookup(strings, cursor.varint()?)?;
    let attribute_count = cursor.varint()?;
    let attribute_count = cursor.bounded_count(u64::from(attribute_count), "attribute count")?;
    let mut attributes = HashMap::with_capacity(attribute_count);
    for _ in 0..attribute_count {
        let key = lookup(strings, cursor.varint()?)?;
        let value = lookup(strings, cursor.varint()?)?;
        attributes.insert(key, value);
    }

    match name {
        "class" => {
            let mut class = JfrClass {
                id: parse_attr(&attributes, "id")?.unwrap_or(0),
                name: attributes.get("name").map(ToString::to_string).unwrap_or_default(),
                super_type: attributes.get("superType").map(ToString::to_string),
                simple_type: attributes.get("simpleType") == Some(&"true"),
                fields: Vec::new(),
            };
            let child_count = cursor.varint()?;
            for _ in 0..child_count {
                read_element(cursor, strings, schema, Some(&mut class))?;
            }
            schema.insert(class);
        }
        "field" => {
            let field = JfrField {
                name: attributes.get("name").map(ToString::to_string).unwrap_or_default(),
                type_id: parse_attr(&attributes, "class")?.unwrap_or(0),
                constant_pool: attributes.get("constantPool") == Some(&"true"),
                dimension: parse_attr(&attributes, "dimension")?.unwrap_or(0),
            };
            if let Some(class) = parent {
                class.fields.push(field);
            }
            // Field children are annotations only
            let child_count = cursor.varint()?;
            for _ in 0..child_count {
                read_element(cursor, strings, schema, None)?;
            }
        }
        _ => {
            let child_count = cursor.varint()?;
            let mut parent = parent;
            for _ in 0..child_count {
                read_element(cursor, strings, schema, parent.as_deref_mut())?;
            }
        }
    }
    Ok(())
}

fn parse_attr<T: std::str::FromStr>(
    attributes: &HashMap<&str, &str>,
    key: &str,
) -> Result<Option<T>, FormatError> {
    attributes
        .get(key)
        .map(|v| {
            v.parse().map_err(|_| {
                FormatError::InvalidFormat(format!("metadata attribute {key}={v} is not a number"))
            })
        })
        .transpose()
}
