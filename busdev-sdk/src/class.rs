use crate::bus::SUBSCRIBER_PREFIX;
use crate::schema::BlobSchema;
use busdev_error::{BusDevError, BusDevResult};
use serde::Deserialize;

/// JSON metadata record declaring one external device class.
///
/// One record per file in the class metadata directory. `info` and `stats`
/// are optional; leaving one out suppresses the corresponding dump
/// capability for the class.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassSpec {
    /// Device type name the class registers under.
    pub name: String,
    /// External handler endpoint name on the bus.
    pub handler: String,
    /// Whether devices of this class aggregate member devices.
    #[serde(default)]
    pub bridge: bool,
    /// Member device name prefix, mandatory for bridge classes.
    #[serde(rename = "br-prefix", default)]
    pub br_prefix: Option<String>,
    /// Configuration blob schema.
    pub config: BlobSchema,
    /// Info dump reply schema.
    #[serde(default)]
    pub info: Option<BlobSchema>,
    /// Statistics dump reply schema.
    #[serde(default)]
    pub stats: Option<BlobSchema>,
}

impl ClassSpec {
    /// Validate invariants the deserializer cannot express.
    pub fn validate(&self) -> BusDevResult<()> {
        if self.name.is_empty() {
            return Err(BusDevError::Config("class with empty name".into()));
        }
        if self.handler.is_empty() {
            return Err(BusDevError::Config(format!(
                "class '{}' declares no handler endpoint",
                self.name
            )));
        }
        if self.bridge && self.br_prefix.as_deref().unwrap_or("").is_empty() {
            return Err(BusDevError::Config(format!(
                "bridge class '{}' declares no member name prefix",
                self.name
            )));
        }
        if self.config.is_empty() {
            return Err(BusDevError::Config(format!(
                "class '{}' declares an empty config schema",
                self.name
            )));
        }
        Ok(())
    }

    /// Name of the per-class subscriber object registered on the bus.
    pub fn subscriber_object(&self) -> String {
        format!("{SUBSCRIBER_PREFIX}{}", self.handler)
    }
}
