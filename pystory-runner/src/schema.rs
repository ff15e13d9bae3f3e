// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Declarative schemas for story documents.
//!
//! A [`Schema`] lists the fields a table may contain. [`Schema::validate`] walks a parsed
//! [`toml_edit`] table and collects every violation as a [`SchemaError`] carrying the path to
//! the offending field, so that all problems in a story file are reported at once.

use crate::{
    errors::{SchemaError, SchemaErrorKind},
    version::{CURRENT_KEY, LEGACY_KEY},
};
use std::fmt::Write as _;
use toml_edit::{Item, TableLike, Value};

/// The fields a table may contain.
#[derive(Debug)]
pub struct Schema {
    fields: &'static [Field],
}

/// A single field in a [`Schema`].
#[derive(Debug)]
pub struct Field {
    name: &'static str,
    required: bool,
    ty: FieldType,
}

impl Field {
    /// A field that must be present.
    pub const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            required: true,
            ty,
        }
    }

    /// A field that may be omitted.
    pub const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            required: false,
            ty,
        }
    }
}

/// The type of a field.
#[derive(Debug)]
pub enum FieldType {
    /// A string.
    Str,
    /// An integer.
    Int,
    /// A boolean.
    Bool,
    /// A table whose values are all strings.
    StrMap,
    /// A nested table.
    Table(&'static Schema),
    /// A string, or a table with exactly the keys `"in python 2"` and `"in python 3"` mapping to
    /// strings.
    StrOrPerVersion,
    /// An array of tables, each holding exactly one key naming a variant of the schema. The
    /// variant's value is validated against that field's type.
    TaggedList(&'static Schema),
}

impl FieldType {
    fn description(&self) -> &'static str {
        match self {
            Self::Str => "a string",
            Self::Int => "an integer",
            Self::Bool => "a boolean",
            Self::StrMap => "a table of strings",
            Self::Table(_) => "a table",
            Self::StrOrPerVersion => "a string or per-version table",
            Self::TaggedList(_) => "an array of tables",
        }
    }
}

impl Schema {
    /// Creates a schema from its fields.
    pub const fn new(fields: &'static [Field]) -> Self {
        Self { fields }
    }

    /// Returns the names of all fields, in declaration order.
    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|field| field.name).collect()
    }

    fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Validates `table` against this schema, appending violations to `errors`.
    ///
    /// `path` is the rendered path of `table` itself.
    pub fn validate(&self, table: &dyn TableLike, path: &str, errors: &mut Vec<SchemaError>) {
        for field in self.fields {
            if field.required && table.get(field.name).is_none_or(Item::is_none) {
                errors.push(SchemaError::new(
                    path,
                    SchemaErrorKind::MissingField { field: field.name },
                ));
            }
        }

        for (key, item) in table.iter() {
            let child_path = join_path(path, key);
            match self.field(key) {
                Some(field) => field.ty.validate(item, &child_path, errors),
                None => errors.push(SchemaError::new(
                    child_path,
                    SchemaErrorKind::UnknownField {
                        field: key.to_owned(),
                        known: self.field_names(),
                    },
                )),
            }
        }
    }
}

impl FieldType {
    fn validate(&self, item: &Item, path: &str, errors: &mut Vec<SchemaError>) {
        let wrong_type = |errors: &mut Vec<SchemaError>| {
            errors.push(SchemaError::new(
                path,
                SchemaErrorKind::WrongType {
                    expected: self.description(),
                    found: item.type_name(),
                },
            ));
        };

        match self {
            Self::Str => {
                if !item.is_str() {
                    wrong_type(errors);
                }
            }
            Self::Int => {
                if !item.is_integer() {
                    wrong_type(errors);
                }
            }
            Self::Bool => {
                if !item.is_bool() {
                    wrong_type(errors);
                }
            }
            Self::StrMap => match item.as_table_like() {
                Some(table) => {
                    for (key, value) in table.iter() {
                        Self::Str.validate(value, &join_path(path, key), errors);
                    }
                }
                None => wrong_type(errors),
            },
            Self::Table(schema) => match item.as_table_like() {
                Some(table) => schema.validate(table, path, errors),
                None => wrong_type(errors),
            },
            Self::StrOrPerVersion => {
                if item.is_str() {
                    return;
                }
                let Some(table) = item.as_table_like() else {
                    wrong_type(errors);
                    return;
                };
                let mut keys: Vec<_> = table.iter().map(|(key, _)| key.to_owned()).collect();
                keys.sort_unstable();
                if keys != [LEGACY_KEY, CURRENT_KEY] {
                    errors.push(SchemaError::new(
                        path,
                        SchemaErrorKind::InvalidVersionKeys { found: keys },
                    ));
                    return;
                }
                for (key, value) in table.iter() {
                    Self::Str.validate(value, &join_path(path, key), errors);
                }
            }
            Self::TaggedList(variants) => {
                let elements: Vec<&dyn TableLike> = match item {
                    Item::ArrayOfTables(array) => {
                        array.iter().map(|table| table as &dyn TableLike).collect()
                    }
                    Item::Value(Value::Array(array)) => {
                        let mut elements = Vec::with_capacity(array.len());
                        for (index, value) in array.iter().enumerate() {
                            match value.as_inline_table() {
                                Some(table) => elements.push(table as &dyn TableLike),
                                None => errors.push(SchemaError::new(
                                    format!("{path}[{index}]"),
                                    SchemaErrorKind::WrongType {
                                        expected: "a table",
                                        found: value.type_name(),
                                    },
                                )),
                            }
                        }
                        elements
                    }
                    _ => {
                        wrong_type(errors);
                        return;
                    }
                };

                for (index, element) in elements.into_iter().enumerate() {
                    let element_path = format!("{path}[{index}]");
                    let kinds: Vec<_> = element.iter().collect();
                    let [(kind, value)] = kinds.as_slice() else {
                        errors.push(SchemaError::new(
                            element_path,
                            SchemaErrorKind::StepKindCount {
                                found: kinds.iter().map(|(key, _)| (*key).to_owned()).collect(),
                            },
                        ));
                        continue;
                    };
                    match variants.field(kind) {
                        Some(field) => {
                            field
                                .ty
                                .validate(value, &join_path(&element_path, kind), errors);
                        }
                        None => errors.push(SchemaError::new(
                            element_path,
                            SchemaErrorKind::UnknownStepKind {
                                kind: (*kind).to_owned(),
                                known: variants.field_names(),
                            },
                        )),
                    }
                }
            }
        }
    }
}

/// Appends `key` to a rendered path, quoting it unless it is a bare TOML key.
pub(crate) fn join_path(path: &str, key: &str) -> String {
    let mut out = String::with_capacity(path.len() + key.len() + 3);
    out.push_str(path);
    if !path.is_empty() {
        out.push('.');
    }
    let bare = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if bare {
        out.push_str(key);
    } else {
        _ = write!(out, "{key:?}");
    }
    out
}
