use crate::semconv;
use crate::span::{AttributeValue, Attributes};

/// Process-wide attributes attached to every exported batch.
///
/// Built once at startup and shared as `Arc<Resource>`; there is no way to
/// mutate it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    attributes: Attributes,
}

impl Resource {
    /// Resource for `service_name`, plus the SDK identification attributes.
    pub fn new(service_name: impl Into<String>) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert(
            semconv::SERVICE_NAME.to_string(),
            AttributeValue::String(service_name.into()),
        );
        attributes.insert(
            semconv::TELEMETRY_SDK_NAME.to_string(),
            env!("CARGO_PKG_NAME").into(),
        );
        attributes.insert(semconv::TELEMETRY_SDK_LANGUAGE.to_string(), "rust".into());
        attributes.insert(
            semconv::TELEMETRY_SDK_VERSION.to_string(),
            env!("CARGO_PKG_VERSION").into(),
        );
        Self { attributes }
    }

    pub fn with_version(self, version: impl Into<String>) -> Self {
        self.with_attribute(semconv::SERVICE_VERSION, version.into())
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn service_name(&self) -> Option<&str> {
        match self.attributes.get(semconv::SERVICE_NAME) {
            Some(AttributeValue::String(name)) => Some(name),
            _ => None,
        }
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

impl Default for Resource {
    fn default() -> Self {
        Self::new("unknown_service")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_attributes() {
        let resource = Resource::new("example-otel/server").with_version("1.2.3");
        assert_eq!(resource.service_name(), Some("example-otel/server"));
        assert_eq!(
            resource.attributes().get(semconv::SERVICE_VERSION),
            Some(&AttributeValue::from("1.2.3"))
        );
        assert_eq!(
            resource.attributes().get(semconv::TELEMETRY_SDK_LANGUAGE),
            Some(&AttributeValue::from("rust"))
        );
    }
}
