//! Scrubbing of user data before it enters a trace
//!
//! - [`obfuscate_sql`]: replaces literals in a statement with `?`
//! - [`safe_url`]: strips userinfo, query string and fragment from a URL
//! - [`vet_query_parameters`]: keeps only scalar query parameter values

mod params;
mod sql;
mod uri;

pub use self::params::{vet_query_parameters, QueryParameters};
pub use self::sql::obfuscate_sql;
pub use self::uri::{safe_url, url_host};
