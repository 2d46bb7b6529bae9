use std::collections::BTreeMap;

use crate::attributes::{AttributeValue, ATTRIBUTE_KEY_LENGTH_LIMIT};

/// Scalar-only query parameters, keys sorted
pub type QueryParameters = BTreeMap<String, AttributeValue>;

/// Keep the parameters whose values are scalars.
///
/// Each unsupported value (null, array, object) or oversized key is dropped on
/// its own; the remaining parameters are still returned.
pub fn vet_query_parameters<I, K>(params: I) -> QueryParameters
where
    I: IntoIterator<Item = (K, serde_json::Value)>,
    K: Into<String>,
{
    let mut vetted = QueryParameters::new();

    for (key, value) in params {
        let key = key.into();
        if key.len() > ATTRIBUTE_KEY_LENGTH_LIMIT {
            tracing::debug!(len = key.len(), "Dropping query parameter with oversized key");
            continue;
        }
        match AttributeValue::from_json(&value) {
            Some(v) => {
                vetted.insert(key, v.truncated());
            }
            None => {
                tracing::debug!(key = %key, "Dropping query parameter with unsupported type");
            }
        }
    }

    vetted
}
