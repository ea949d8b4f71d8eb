//! Classes and field types
//!
//! A class is an immutable record: a name plus an ordered field schema,
//! identified by a reference. Classes are themselves stored as instances of
//! the distinguished system class `$Class` in the system bucket; named
//! roots are instances of `$Namer`. One concrete record type covers both
//! system and user classes, distinguished by a [`ClassSource`] tag.
//!
//! Field types are encoded as strings:
//!
//! - `[S`: inline UTF string
//! - `[D`: external data blob
//! - `[L<Element#ref>(unique|duplicates[,keyField,[-]orderFn])`: external
//!   ordered reference list
//! - `Name#<32-hex>`: reference to an instance of a user class
//! - `$Class`: reference to a class

use once_cell::sync::Lazy;

use basalt_core::key::{
    SYSTEM_CLASS_BUCKET_KEY, SYSTEM_CLASS_LIST_KEY, SYSTEM_NAMER_BUCKET_KEY,
    SYSTEM_NAMER_LIST_KEY,
};
use basalt_core::{Error, Reference, Result, StoreKey};

/// Reference of the `$Class` system class (and of its bucket).
pub const CLASS_CLASS_REF: Reference = Reference::new(0, 5);
/// Reference of the `$Namer` system class (and of its bucket).
pub const NAMER_CLASS_REF: Reference = Reference::new(0, 6);
/// Reference of the system class list instance.
pub const CLASS_LIST_REF: Reference = Reference::new(0, 7);
/// Reference of the system namer list instance (the named items).
pub const NAMER_LIST_REF: Reference = Reference::new(0, 8);
/// Reference of the class list's list type in the dictionary.
pub const CLASS_LIST_TYPE_REF: Reference = Reference::new(0, 9);
/// Reference of the namer list's list type in the dictionary.
pub const NAMER_LIST_TYPE_REF: Reference = Reference::new(0, 10);

/// Storage key of a system reference, bypassing the lookup table.
pub fn system_key_for(reference: Reference) -> Option<StoreKey> {
    if reference == CLASS_CLASS_REF {
        Some(SYSTEM_CLASS_BUCKET_KEY)
    } else if reference == NAMER_CLASS_REF {
        Some(SYSTEM_NAMER_BUCKET_KEY)
    } else if reference == CLASS_LIST_REF {
        Some(SYSTEM_CLASS_LIST_KEY)
    } else if reference == NAMER_LIST_REF {
        Some(SYSTEM_NAMER_LIST_KEY)
    } else {
        None
    }
}

/// Where a class definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassSource {
    /// Pre-baked system class (`$Class`, `$Namer`).
    System,
    /// Defined by a user transaction.
    User,
}

/// One field of a class schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Encoded field type.
    pub type_code: String,
    /// Whether instances may replace this field's value.
    pub mutable: bool,
}

/// An immutable class definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdbClass {
    /// Class name.
    pub name: String,
    /// The class's reference; also keys its instance bucket.
    pub reference: Reference,
    /// System or user defined.
    pub source: ClassSource,
    /// Field schema in declaration order.
    pub fields: Vec<FieldDef>,
}

impl OdbClass {
    /// The line-delimited `name type mutable` schema form stored in the
    /// class's `$Class` instance.
    pub fn schema_string(&self) -> String {
        let mut out = String::new();
        for f in &self.fields {
            out.push_str(&f.name);
            out.push(' ');
            out.push_str(&f.type_code);
            out.push(' ');
            out.push_str(if f.mutable { "true" } else { "false" });
            out.push('\n');
        }
        out
    }

    /// Parse a schema string back into a class record.
    pub fn from_schema(
        name: String,
        reference: Reference,
        source: ClassSource,
        schema: &str,
    ) -> Result<OdbClass> {
        let mut fields = Vec::new();
        for line in schema.lines() {
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split(' ');
            let (Some(fname), Some(ftype), Some(fmut), None) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                return Err(Error::Corruption(format!(
                    "Malformed schema line {line:?} in class {name}"
                )));
            };
            let mutable = match fmut {
                "true" => true,
                "false" => false,
                other => {
                    return Err(Error::Corruption(format!(
                        "Malformed mutability flag {other:?} in class {name}"
                    )))
                }
            };
            fields.push(FieldDef {
                name: fname.to_string(),
                type_code: ftype.to_string(),
                mutable,
            });
        }
        Ok(OdbClass {
            name,
            reference,
            source,
            fields,
        })
    }

    /// Index of the field named `name`.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Parsed form of a list field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTypeSpec {
    /// Element class name.
    pub element_name: String,
    /// Element class reference; `None` only before batch resolution.
    pub element_ref: Option<Reference>,
    /// Whether equal keys may coexist.
    pub allow_duplicates: bool,
    /// Field of the element class the list orders by; `None` orders by
    /// reference value.
    pub key_field: Option<String>,
    /// Whether the key order is reversed.
    pub descending: bool,
    /// Collator name (`lexi`).
    pub collator: Option<String>,
}

impl ListTypeSpec {
    /// The canonical type-code string.
    pub fn to_code(&self) -> String {
        let mut out = String::from("[L<");
        out.push_str(&self.element_name);
        if let Some(r) = self.element_ref {
            out.push('#');
            out.push_str(&r.to_string());
        }
        out.push_str(">(");
        out.push_str(if self.allow_duplicates {
            "duplicates"
        } else {
            "unique"
        });
        if let Some(key) = &self.key_field {
            out.push(',');
            out.push_str(key);
            out.push(',');
            if self.descending {
                out.push('-');
            }
            out.push_str(self.collator.as_deref().unwrap_or("lexi"));
        }
        out.push(')');
        out
    }
}

/// Parsed form of a field type code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// `[S`
    InlineString,
    /// `[D`
    Data,
    /// `[L<...>(...)`
    List(ListTypeSpec),
    /// `Name` or `Name#ref`
    Instance {
        /// Declared class name.
        class_name: String,
        /// Declared class reference; `None` only before batch resolution.
        class_ref: Option<Reference>,
    },
    /// `$Class`
    ClassRef,
}

fn parse_name_and_ref(s: &str) -> Result<(String, Option<Reference>)> {
    match s.split_once('#') {
        None => Ok((s.to_string(), None)),
        Some((name, hex)) => {
            let r = hex
                .parse::<Reference>()
                .map_err(|e| Error::Corruption(format!("Bad reference in type {s:?}: {e}")))?;
            Ok((name.to_string(), Some(r)))
        }
    }
}

/// Parse a field type code.
pub fn parse_field_type(code: &str) -> Result<FieldType> {
    if code == "[S" {
        return Ok(FieldType::InlineString);
    }
    if code == "[D" {
        return Ok(FieldType::Data);
    }
    if code == "$Class" {
        return Ok(FieldType::ClassRef);
    }
    if let Some(rest) = code.strip_prefix("[L<") {
        let (element, spec) = rest
            .split_once(">(")
            .ok_or_else(|| Error::Corruption(format!("Malformed list type {code:?}")))?;
        let spec = spec
            .strip_suffix(')')
            .ok_or_else(|| Error::Corruption(format!("Malformed list type {code:?}")))?;
        let (element_name, element_ref) = parse_name_and_ref(element)?;

        let mut parts = spec.split(',');
        let allow_duplicates = match parts.next() {
            Some("unique") => false,
            Some("duplicates") => true,
            _ => {
                return Err(Error::Corruption(format!(
                    "Malformed list policy in type {code:?}"
                )))
            }
        };
        let (key_field, descending, collator) = match (parts.next(), parts.next(), parts.next()) {
            (None, _, _) => (None, false, None),
            (Some(key), Some(order), None) => {
                let (descending, order) = match order.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, order),
                };
                (Some(key.to_string()), descending, Some(order.to_string()))
            }
            _ => {
                return Err(Error::Corruption(format!(
                    "Malformed list order in type {code:?}"
                )))
            }
        };
        return Ok(FieldType::List(ListTypeSpec {
            element_name,
            element_ref,
            allow_duplicates,
            key_field,
            descending,
            collator,
        }));
    }
    let (class_name, class_ref) = parse_name_and_ref(code)?;
    Ok(FieldType::Instance {
        class_name,
        class_ref,
    })
}

/// The `$Class` system class definition.
pub static CLASS_CLASS: Lazy<OdbClass> = Lazy::new(|| OdbClass {
    name: "$Class".to_string(),
    reference: CLASS_CLASS_REF,
    source: ClassSource::System,
    fields: vec![
        FieldDef {
            name: "name".to_string(),
            type_code: "[S".to_string(),
            mutable: false,
        },
        FieldDef {
            name: "serialization".to_string(),
            type_code: "[S".to_string(),
            mutable: false,
        },
    ],
});

/// The `$Namer` system class definition.
pub static NAMER_CLASS: Lazy<OdbClass> = Lazy::new(|| OdbClass {
    name: "$Namer".to_string(),
    reference: NAMER_CLASS_REF,
    source: ClassSource::System,
    fields: vec![
        FieldDef {
            name: "name".to_string(),
            type_code: "[S".to_string(),
            mutable: false,
        },
        FieldDef {
            name: "class_ref".to_string(),
            type_code: "[S".to_string(),
            mutable: false,
        },
        FieldDef {
            name: "ref".to_string(),
            type_code: "[S".to_string(),
            mutable: false,
        },
    ],
});

/// The type code of the system class list.
pub fn class_list_type_code() -> String {
    ListTypeSpec {
        element_name: "$Class".to_string(),
        element_ref: Some(CLASS_CLASS_REF),
        allow_duplicates: false,
        key_field: Some("name".to_string()),
        descending: false,
        collator: Some("lexi".to_string()),
    }
    .to_code()
}

/// The type code of the system namer list.
pub fn namer_list_type_code() -> String {
    ListTypeSpec {
        element_name: "$Namer".to_string(),
        element_ref: Some(NAMER_CLASS_REF),
        allow_duplicates: false,
        key_field: Some("name".to_string()),
        descending: false,
        collator: Some("lexi".to_string()),
    }
    .to_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_round_trip() {
        let class = OdbClass {
            name: "Person".to_string(),
            reference: Reference::new(1, 2),
            source: ClassSource::User,
            fields: vec![
                FieldDef {
                    name: "name".to_string(),
                    type_code: "[S".to_string(),
                    mutable: false,
                },
                FieldDef {
                    name: "photo".to_string(),
                    type_code: "[D".to_string(),
                    mutable: false,
                },
                FieldDef {
                    name: "note".to_string(),
                    type_code: "[S".to_string(),
                    mutable: true,
                },
            ],
        };
        let schema = class.schema_string();
        assert_eq!(schema, "name [S false\nphoto [D false\nnote [S true\n");

        let parsed = OdbClass::from_schema(
            "Person".to_string(),
            Reference::new(1, 2),
            ClassSource::User,
            &schema,
        )
        .unwrap();
        assert_eq!(parsed, class);
    }

    #[test]
    fn test_from_schema_rejects_malformed() {
        assert!(OdbClass::from_schema(
            "X".into(),
            Reference::new(0, 1),
            ClassSource::User,
            "only two\n"
        )
        .is_err());
        assert!(OdbClass::from_schema(
            "X".into(),
            Reference::new(0, 1),
            ClassSource::User,
            "a [S maybe\n"
        )
        .is_err());
    }

    #[test]
    fn test_field_index() {
        assert_eq!(CLASS_CLASS.field_index("name"), Some(0));
        assert_eq!(CLASS_CLASS.field_index("serialization"), Some(1));
        assert_eq!(CLASS_CLASS.field_index("missing"), None);
    }

    #[test]
    fn test_parse_simple_types() {
        assert_eq!(parse_field_type("[S").unwrap(), FieldType::InlineString);
        assert_eq!(parse_field_type("[D").unwrap(), FieldType::Data);
        assert_eq!(parse_field_type("$Class").unwrap(), FieldType::ClassRef);
    }

    #[test]
    fn test_parse_instance_type() {
        assert_eq!(
            parse_field_type("Person").unwrap(),
            FieldType::Instance {
                class_name: "Person".to_string(),
                class_ref: None,
            }
        );
        let r = Reference::new(3, 4);
        let code = format!("Person#{r}");
        assert_eq!(
            parse_field_type(&code).unwrap(),
            FieldType::Instance {
                class_name: "Person".to_string(),
                class_ref: Some(r),
            }
        );
    }

    #[test]
    fn test_parse_list_type_with_key() {
        let r = Reference::new(3, 4);
        let code = format!("[L<Person#{r}>(duplicates,name,lexi)");
        let FieldType::List(spec) = parse_field_type(&code).unwrap() else {
            panic!("expected list type");
        };
        assert_eq!(spec.element_name, "Person");
        assert_eq!(spec.element_ref, Some(r));
        assert!(spec.allow_duplicates);
        assert_eq!(spec.key_field.as_deref(), Some("name"));
        assert!(!spec.descending);
        assert_eq!(spec.collator.as_deref(), Some("lexi"));
        // Canonical re-encoding matches.
        assert_eq!(spec.to_code(), code);
    }

    #[test]
    fn test_parse_list_type_descending() {
        let code = "[L<Tag#00000000000000030000000000000004>(unique,name,-lexi)";
        let FieldType::List(spec) = parse_field_type(code).unwrap() else {
            panic!("expected list type");
        };
        assert!(!spec.allow_duplicates);
        assert!(spec.descending);
        assert_eq!(spec.to_code(), code);
    }

    #[test]
    fn test_parse_list_type_reference_ordered() {
        let code = "[L<Tag#00000000000000030000000000000004>(duplicates)";
        let FieldType::List(spec) = parse_field_type(code).unwrap() else {
            panic!("expected list type");
        };
        assert!(spec.allow_duplicates);
        assert_eq!(spec.key_field, None);
        assert_eq!(spec.to_code(), code);
    }

    #[test]
    fn test_parse_list_type_rejects_malformed() {
        assert!(parse_field_type("[L<Person").is_err());
        assert!(parse_field_type("[L<Person>(maybe)").is_err());
        assert!(parse_field_type("[L<Person>(unique,name)").is_err());
        assert!(parse_field_type("[L<Person>(unique,name,lexi,extra)").is_err());
    }

    #[test]
    fn test_system_keys() {
        assert_eq!(
            system_key_for(CLASS_CLASS_REF),
            Some(SYSTEM_CLASS_BUCKET_KEY)
        );
        assert_eq!(
            system_key_for(NAMER_CLASS_REF),
            Some(SYSTEM_NAMER_BUCKET_KEY)
        );
        assert_eq!(system_key_for(CLASS_LIST_REF), Some(SYSTEM_CLASS_LIST_KEY));
        assert_eq!(system_key_for(NAMER_LIST_REF), Some(SYSTEM_NAMER_LIST_KEY));
        assert_eq!(system_key_for(Reference::new(9, 9)), None);
    }

    #[test]
    fn test_system_list_type_codes_parse() {
        for code in [class_list_type_code(), namer_list_type_code()] {
            let FieldType::List(spec) = parse_field_type(&code).unwrap() else {
                panic!("expected list type");
            };
            assert!(!spec.allow_duplicates);
            assert_eq!(spec.key_field.as_deref(), Some("name"));
        }
    }
}
