//! Normalization of heterogeneous upstream records into the canonical
//! {property, contact, raw} triple.
//!
//! Upstream sources disagree on field names, so every resolution is a
//! priority-ordered scan over known candidates. A record that matches
//! nothing yields nulls, never an error, and `raw` always keeps the
//! untouched input so records can be reprocessed if these rules change.

use serde_json::Value;

use crate::types::{ContactFields, NormalizedRecord, PropertyFields};

const EXTERNAL_ID_FIELDS: &[&str] = &["id", "propertyId", "property_id", "apn"];
const NAME_FIELDS: &[&str] = &["ownerName", "owner_name", "owner1FullName", "name", "contactName"];
const NAME_PAIRS: &[(&str, &str)] = &[
    ("firstName", "lastName"),
    ("first_name", "last_name"),
    ("owner1FirstName", "owner1LastName"),
];
const ADDRESS_FIELDS: &[&str] = &["address", "streetAddress", "street_address", "propertyAddress"];
const PHONE_FIELDS: &[&str] = &["phone", "phoneNumber", "phone_number"];
const EMAIL_FIELDS: &[&str] = &["email", "emailAddress", "email_address"];

/// Map one raw upstream record into the canonical triple.
pub fn normalize_record(raw: Value) -> NormalizedRecord {
    let property = PropertyFields {
        external_id: string_field(&raw, EXTERNAL_ID_FIELDS),
        address: resolve_address(&raw),
        city: locality_field(&raw, &["city"]),
        state: locality_field(&raw, &["state"]),
        zip: locality_field(&raw, &["zip", "zipCode", "zip_code", "postalCode"]),
    };

    let contact = ContactFields {
        name: resolve_name(&raw),
        phone: string_field(&raw, PHONE_FIELDS),
        email: string_field(&raw, EMAIL_FIELDS),
    };

    NormalizedRecord {
        property,
        contact,
        raw,
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-empty scalar among the candidate keys.
fn string_field(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| record.get(key).and_then(scalar_string))
}

/// Nested address object: either `address` itself or `property.address`.
fn address_object(record: &Value) -> Option<&Value> {
    record
        .get("address")
        .filter(|v| v.is_object())
        .or_else(|| {
            record
                .get("property")
                .and_then(|p| p.get("address"))
                .filter(|v| v.is_object())
        })
}

fn resolve_address(record: &Value) -> Option<String> {
    string_field(record, ADDRESS_FIELDS)
        .or_else(|| address_object(record).and_then(|obj| string_field(obj, &["address", "street"])))
}

/// City/state/zip come from the top-level record first, then from the
/// resolved address object's corresponding sub-fields.
fn locality_field(record: &Value, keys: &[&str]) -> Option<String> {
    string_field(record, keys)
        .or_else(|| address_object(record).and_then(|obj| string_field(obj, keys)))
}

fn resolve_name(record: &Value) -> Option<String> {
    if let Some(name) = string_field(record, NAME_FIELDS) {
        return Some(name);
    }

    for (first_key, last_key) in NAME_PAIRS {
        let parts: Vec<String> = [*first_key, *last_key]
            .into_iter()
            .filter_map(|key| record.get(key).and_then(scalar_string))
            .collect();
        if !parts.is_empty() {
            return Some(parts.join(" "));
        }
    }

    None
}
