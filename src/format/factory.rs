use std::{collections::BTreeMap, sync::Arc, sync::LazyLock};

use super::{Format, JsonFormat, XmlFormat};
use crate::errors::GatewayError;

pub const DEFAULT_FORMAT: &str = "xml";

static FORMATS: LazyLock<BTreeMap<&'static str, Arc<dyn Format>>> = LazyLock::new(|| {
    let formats: [Arc<dyn Format>; 2] = [Arc::new(XmlFormat::new()), Arc::new(JsonFormat::new())];
    formats
        .into_iter()
        .map(|format| (format.name(), format))
        .collect()
});

/// Lookup over the process-wide format registry.
pub struct FormatFactory;

impl FormatFactory {
    pub fn create(name: &str) -> Result<Arc<dyn Format>, GatewayError> {
        FORMATS
            .get(name.trim().to_ascii_lowercase().as_str())
            .cloned()
            .ok_or_else(|| GatewayError::unknown_format(name))
    }

    pub fn create_or_default(name: &str) -> Arc<dyn Format> {
        Self::create(name).unwrap_or_else(|_| Self::default_format())
    }

    pub fn default_format() -> Arc<dyn Format> {
        FORMATS
            .get(DEFAULT_FORMAT)
            .cloned()
            .unwrap_or_else(|| Arc::new(XmlFormat::new()))
    }

    pub fn names() -> Vec<&'static str> {
        FORMATS.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_registered_formats() {
        assert_eq!(FormatFactory::create("xml").expect("xml").name(), "xml");
        assert_eq!(FormatFactory::create("JSON").expect("json").name(), "json");
    }

    #[test]
    fn unknown_format_fails() {
        let err = FormatFactory::create("yaml").err().expect("unknown format must fail");
        assert!(matches!(err, GatewayError::UnknownFormat { ref name } if name == "yaml"));
    }

    #[test]
    fn unknown_format_falls_back_to_default() {
        assert_eq!(FormatFactory::create_or_default("yaml").name(), DEFAULT_FORMAT);
        assert_eq!(FormatFactory::create_or_default("").name(), DEFAULT_FORMAT);
    }

    #[test]
    fn lists_registered_names() {
        assert_eq!(FormatFactory::names(), vec!["json", "xml"]);
    }
}
