//! Shared option baseline fetched from the backing daemon.

use super::schema::OptionSchema;
use super::value::OptionValue;
use crate::config::DaemonConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Options of one section, keyed by field name.
pub type SectionValues = BTreeMap<String, OptionValue>;

/// Section-partitioned option baseline shared read-only by the supervisors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SharedEnvironmentContext {
    sections: BTreeMap<String, SectionValues>,
}

impl SharedEnvironmentContext {
    /// Context with no baseline values. Overrides still apply on top of it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from the daemon's `options/get` response.
    ///
    /// Only the sections listed in [`DaemonConfig::OPTION_SECTIONS`] are kept.
    pub fn from_options_json(options: &serde_json::Value) -> Self {
        let mut sections = BTreeMap::new();

        for &section in DaemonConfig::OPTION_SECTIONS {
            let Some(raw) = options.get(section).and_then(|v| v.as_object()) else {
                warn!("Daemon options have no '{}' section", section);
                sections.insert(section.to_string(), SectionValues::new());
                continue;
            };

            let schema = OptionSchema::for_section(section);
            let values: SectionValues = raw
                .iter()
                .map(|(name, value)| {
                    let declared = schema.and_then(|s| s.by_field(name)).map(|f| f.field_type);
                    (name.clone(), OptionValue::from_json(value, declared))
                })
                .collect();

            debug!("Fetched {} '{}' options", values.len(), section);
            sections.insert(section.to_string(), values);
        }

        Self { sections }
    }

    /// Insert a single baseline value.
    pub fn with_value(mut self, section: &str, field: &str, value: OptionValue) -> Self {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(field.to_string(), value);
        self
    }

    pub fn section(&self, name: &str) -> Option<&SectionValues> {
        self.sections.get(name)
    }

    pub fn get(&self, section: &str, field: &str) -> Option<&OptionValue> {
        self.sections.get(section).and_then(|s| s.get(field))
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &SectionValues)> {
        self.sections.iter().map(|(name, values)| (name.as_str(), values))
    }

    pub fn is_empty(&self) -> bool {
        self.sections.values().all(BTreeMap::is_empty)
    }
}
