//! Record annotation flattening
//!
//! Adds convenience aliases next to the server's instance annotations:
//! `field@OData.Community.Display.V1.FormattedValue` -> `field_Formatted`, etc.
//! The original annotated keys are kept.

use serde_json::{Map, Value};

const ALIASES: &[(&str, &str)] = &[
    ("@OData.Community.Display.V1.FormattedValue", "_Formatted"),
    ("@Microsoft.Dynamics.CRM.lookuplogicalname", "_LogicalName"),
    (
        "@Microsoft.Dynamics.CRM.associatednavigationproperty",
        "_NavigationProperty",
    ),
];

/// Recursively add alias keys for formatted values and lookup annotations
pub fn flatten_annotations(value: &Value) -> Value {
    match value {
        Value::Object(members) => {
            let mut result = Map::with_capacity(members.len());
            for (key, member) in members {
                if let Some(alias) = alias_for(key) {
                    result.insert(alias, member.clone());
                }
                result.insert(key.clone(), flatten_annotations(member));
            }
            Value::Object(result)
        }
        Value::Array(items) => Value::Array(items.iter().map(flatten_annotations).collect()),
        other => other.clone(),
    }
}

fn alias_for(key: &str) -> Option<String> {
    ALIASES.iter().find_map(|(annotation, suffix)| {
        key.strip_suffix(annotation)
            .filter(|field| !field.is_empty())
            .map(|field| format!("{}{}", field, suffix))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flattens_nested_records() {
        let record = json!({
            "statecode": 0,
            "statecode@OData.Community.Display.V1.FormattedValue": "Active",
            "_ownerid_value": "8f2b6c1e-3a4d-4e5f-9a0b-1c2d3e4f5a6b",
            "_ownerid_value@Microsoft.Dynamics.CRM.lookuplogicalname": "systemuser",
            "_ownerid_value@Microsoft.Dynamics.CRM.associatednavigationproperty": "ownerid",
            "contact_customer_accounts": [
                {"gendercode@OData.Community.Display.V1.FormattedValue": "Male"}
            ]
        });

        let flat = flatten_annotations(&record);
        assert_eq!(flat["statecode_Formatted"], "Active");
        assert_eq!(flat["_ownerid_value_LogicalName"], "systemuser");
        assert_eq!(flat["_ownerid_value_NavigationProperty"], "ownerid");
        assert_eq!(flat["contact_customer_accounts"][0]["gendercode_Formatted"], "Male");
        assert_eq!(
            flat["statecode@OData.Community.Display.V1.FormattedValue"],
            "Active"
        );
    }

    #[test]
    fn test_plain_values_untouched() {
        let record = json!({"name": "Contoso", "@odata.etag": "W/\"1\""});
        assert_eq!(flatten_annotations(&record), record);
    }
}
