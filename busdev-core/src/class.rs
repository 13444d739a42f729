use crate::link::HandlerLink;
use busdev_error::BusDevResult;
use busdev_sdk::{BlobSchema, BusTransport, ClassSpec};
use std::sync::Arc;

/// One registered device class: the validated metadata record, its compiled
/// schemas, and the subscription link to its external handler.
///
/// Immutable after registration; only the link carries mutable state.
pub struct DeviceClass {
    spec: ClassSpec,
    link: HandlerLink,
}

impl DeviceClass {
    pub fn new(spec: ClassSpec, bus: Arc<dyn BusTransport>) -> BusDevResult<Self> {
        spec.validate()?;
        let link = HandlerLink::new(spec.name.clone(), spec.handler.clone(), bus);
        Ok(Self { spec, link })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    #[inline]
    pub fn handler_endpoint(&self) -> &str {
        &self.spec.handler
    }

    #[inline]
    pub fn bridge_capability(&self) -> bool {
        self.spec.bridge
    }

    /// Member device name prefix. Only present on bridge classes.
    #[inline]
    pub fn member_prefix(&self) -> Option<&str> {
        self.spec.br_prefix.as_deref()
    }

    #[inline]
    pub fn config_schema(&self) -> &BlobSchema {
        &self.spec.config
    }

    #[inline]
    pub fn info_schema(&self) -> Option<&BlobSchema> {
        self.spec.info.as_ref()
    }

    #[inline]
    pub fn stats_schema(&self) -> Option<&BlobSchema> {
        self.spec.stats.as_ref()
    }

    #[inline]
    pub fn link(&self) -> &HandlerLink {
        &self.link
    }
}
