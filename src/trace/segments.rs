//! Naming and parameter construction per segment category

use url::Url;

use super::node::{DatastoreParams, SegmentParams};
use crate::sanitize::{obfuscate_sql, safe_url, url_host, vet_query_parameters, QueryParameters};

const UNKNOWN: &str = "unknown";

pub(crate) fn custom_metric_name(label: &str) -> String {
    format!("Custom/{}", label)
}

/// Inputs for ending a datastore segment
#[derive(Debug, Clone, Default)]
pub struct DatastoreSegment {
    /// e.g. `MySQL`
    pub product: String,
    /// e.g. `SELECT`
    pub operation: String,
    /// Table or collection name
    pub collection: Option<String>,
    /// Raw statement text; obfuscated before it is stored
    pub query: Option<String>,
    pub query_parameters: Option<QueryParameters>,
    pub host: Option<String>,
    pub port_path_or_id: Option<String>,
    pub database: Option<String>,
}

fn non_empty(s: impl Into<String>) -> Option<String> {
    let s = s.into();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

impl DatastoreSegment {
    pub fn new(product: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = non_empty(collection);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = non_empty(query);
        self
    }

    /// Attach query parameters; values that are not scalars are dropped
    pub fn with_query_parameters<I, K>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        self.query_parameters = Some(vet_query_parameters(params));
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = non_empty(host);
        self
    }

    pub fn with_port_path_or_id(mut self, port: impl Into<String>) -> Self {
        self.port_path_or_id = non_empty(port);
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = non_empty(database);
        self
    }

    pub(crate) fn metric_name(&self) -> String {
        match &self.collection {
            Some(collection) => format!(
                "Datastore/statement/{}/{}/{}",
                self.product, collection, self.operation
            ),
            None => format!("Datastore/operation/{}/{}", self.product, self.operation),
        }
    }

    /// Build the node params. Query parameters are kept only when
    /// `full_diagnostics` is set.
    pub(crate) fn into_params(self, full_diagnostics: bool) -> SegmentParams {
        let nothing_known = self.collection.is_none()
            && self.host.is_none()
            && self.port_path_or_id.is_none()
            && self.query.is_none();

        let (query, mut host, mut port_path_or_id) = if nothing_known {
            (
                Some(format!(
                    "'{}' on '{}' using '{}'",
                    self.operation, UNKNOWN, self.product
                )),
                Some(UNKNOWN.to_string()),
                Some(UNKNOWN.to_string()),
            )
        } else {
            let query = self
                .query
                .as_deref()
                .and_then(|q| obfuscate_sql(&self.product, q));
            (query, self.host, self.port_path_or_id)
        };

        match (&host, &port_path_or_id) {
            (Some(_), None) => port_path_or_id = Some(UNKNOWN.to_string()),
            (None, Some(_)) => host = Some(UNKNOWN.to_string()),
            _ => {}
        }

        let query_parameters = if full_diagnostics {
            self.query_parameters.filter(|p| !p.is_empty())
        } else {
            None
        };

        SegmentParams::Datastore(DatastoreParams {
            product: self.product,
            operation: self.operation,
            collection: self.collection,
            host,
            port_path_or_id,
            database: self.database,
            query,
            query_parameters,
        })
    }
}

pub(crate) fn external_metric_name(url: Option<&Url>) -> String {
    let host = url.and_then(url_host);
    format!("External/{}/all", host.as_deref().unwrap_or(UNKNOWN))
}

pub(crate) fn external_params(url: Option<&Url>) -> SegmentParams {
    SegmentParams::External {
        uri: url.map(safe_url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn datastore(params: SegmentParams) -> DatastoreParams {
        match params {
            SegmentParams::Datastore(ds) => ds,
            other => panic!("expected datastore params, got {:?}", other),
        }
    }

    #[test]
    fn test_datastore_metric_names() {
        let seg = DatastoreSegment::new("MySQL", "SELECT");
        assert_eq!(seg.metric_name(), "Datastore/operation/MySQL/SELECT");

        let seg = seg.with_collection("my_table");
        assert_eq!(seg.metric_name(), "Datastore/statement/MySQL/my_table/SELECT");

        let seg = DatastoreSegment::new("MySQL", "SELECT").with_collection("");
        assert_eq!(seg.metric_name(), "Datastore/operation/MySQL/SELECT");
    }

    #[test]
    fn test_datastore_synthesized_statement() {
        let ds = datastore(DatastoreSegment::new("MySQL", "SELECT").into_params(false));
        assert_eq!(ds.host.as_deref(), Some("unknown"));
        assert_eq!(ds.port_path_or_id.as_deref(), Some("unknown"));
        assert_eq!(ds.query.as_deref(), Some("'SELECT' on 'unknown' using 'MySQL'"));
    }

    #[test]
    fn test_datastore_collection_only_not_synthesized() {
        let ds = datastore(
            DatastoreSegment::new("MySQL", "SELECT")
                .with_collection("my_table")
                .into_params(true),
        );
        assert_eq!(ds.host, None);
        assert_eq!(ds.port_path_or_id, None);
        assert_eq!(ds.query, None);
    }

    #[test]
    fn test_datastore_half_known_address() {
        let ds = datastore(
            DatastoreSegment::new("Postgres", "INSERT")
                .with_host("db-1")
                .into_params(false),
        );
        assert_eq!(ds.host.as_deref(), Some("db-1"));
        assert_eq!(ds.port_path_or_id.as_deref(), Some("unknown"));
    }

    #[test]
    fn test_datastore_query_obfuscated() {
        let ds = datastore(
            DatastoreSegment::new("MySQL", "SELECT")
                .with_collection("users")
                .with_query("SELECT * FROM users WHERE id = 42")
                .into_params(false),
        );
        assert_eq!(ds.query.as_deref(), Some("SELECT * FROM users WHERE id = ?"));
    }

    #[test]
    fn test_query_parameters_require_full_diagnostics() {
        let seg = DatastoreSegment::new("MySQL", "SELECT")
            .with_query("SELECT 1")
            .with_query_parameters(vec![("zip", json!(1)), ("bad", json!([1]))]);

        let below = datastore(seg.clone().into_params(false));
        assert_eq!(below.query_parameters, None);

        let above = datastore(seg.into_params(true));
        let params = above.query_parameters.unwrap();
        assert_eq!(params.len(), 1);
        assert!(params.contains_key("zip"));
    }

    #[test]
    fn test_external_names() {
        let url = Url::parse("http://example.com/zip/zap?secret=shhh").unwrap();
        assert_eq!(external_metric_name(Some(&url)), "External/example.com/all");
        assert_eq!(
            external_params(Some(&url)),
            SegmentParams::External {
                uri: Some("http://example.com/zip/zap".to_string())
            }
        );

        assert_eq!(external_metric_name(None), "External/unknown/all");
        assert_eq!(external_params(None), SegmentParams::External { uri: None });
    }

    #[test]
    fn test_custom_metric_name() {
        assert_eq!(custom_metric_name("t1"), "Custom/t1");
    }
}
