pub mod pipeline;
pub mod render;
pub mod table;
pub mod template;
pub mod writer;

use serde::{Deserialize, Serialize};

use self::table::capitalize_words;

/// A warehouse (branch) that gets its own report image.
///
/// The name must match the identifier used in the Metabase tables.  An
/// optional `query` replaces the shared native query for this warehouse only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl Warehouse {
    pub fn new(name: &str) -> Self {
        Warehouse {
            name: name.to_string(),
            query: None,
        }
    }

    /// Human readable branch label, e.g. `titip_aja_pancoran` -> `Titip Aja Pancoran`
    pub fn display_name(&self) -> String {
        capitalize_words(&self.name.replace('_', " "))
    }
}
