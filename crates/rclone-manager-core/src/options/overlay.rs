//! Overlaying per-workload environment overrides onto the shared baseline.

use super::context::{SectionValues, SharedEnvironmentContext};
use super::schema::OptionSchema;
use super::value::{coerce, OptionValue};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Options in effect for one workload after overlaying its overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectiveOptions {
    sections: BTreeMap<&'static str, SectionValues>,
    overridden: BTreeMap<&'static str, BTreeSet<String>>,
}

impl SharedEnvironmentContext {
    /// Overlay `overrides` (an environment map) onto this baseline.
    ///
    /// Keys of the form `RCLONE_<SECTION>_<NAME>` are matched against the
    /// section's field table and coerced to the field's declared type, or to
    /// the baseline value's type for fields missing from the table. A value
    /// that does not coerce leaves the baseline in place.
    pub fn overlay(&self, overrides: &BTreeMap<String, String>) -> EffectiveOptions {
        let mut effective = EffectiveOptions::default();

        for schema in OptionSchema::all() {
            let section = schema.section();
            let mut values = self.section(section).cloned().unwrap_or_default();
            let mut overridden = BTreeSet::new();

            for (key, raw) in overrides {
                let field = match schema.resolve_env_key(key) {
                    None => continue,
                    Some(Ok(field)) => field,
                    Some(Err(flag)) => {
                        warn!("{}: no {} option named '{}', ignoring", key, section, flag);
                        continue;
                    }
                };

                let declared = field.field_type;
                if let Some(current) = values.get(field.field) {
                    if current.field_type().is_some_and(|t| t != declared) {
                        debug!(
                            "{}.{} baseline is {:?}, coercing override as {}",
                            section, field.field, current, declared
                        );
                    }
                }

                match coerce(declared, raw) {
                    Ok(value) => {
                        debug!("Override {}.{} = {:?} from {}", section, field.field, value, key);
                        values.insert(field.field.to_string(), value);
                        overridden.insert(field.field.to_string());
                    }
                    Err(e) => {
                        warn!("{}: {}; keeping baseline for {}.{}", key, e, section, field.field);
                    }
                }
            }

            effective.sections.insert(section, values);
            effective.overridden.insert(section, overridden);
        }

        effective
    }
}

impl EffectiveOptions {
    pub fn get(&self, section: &str, field: &str) -> Option<&OptionValue> {
        self.sections.get(section).and_then(|s| s.get(field))
    }

    pub fn is_overridden(&self, section: &str, field: &str) -> bool {
        self.overridden
            .get(section)
            .is_some_and(|fields| fields.contains(field))
    }

    pub fn has_overrides(&self) -> bool {
        self.overridden.values().any(|fields| !fields.is_empty())
    }

    /// All sections as one JSON object, e.g. `{"mount": {..}, "vfs": {..}}`.
    pub fn to_json(&self) -> serde_json::Value {
        let sections = self
            .sections
            .iter()
            .map(|(section, values)| {
                let object = values
                    .iter()
                    .map(|(field, value)| (field.clone(), value.to_json()))
                    .collect::<serde_json::Map<_, _>>();
                (section.to_string(), serde_json::Value::Object(object))
            })
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(sections)
    }

    /// `--flag=value` arguments for every overridden field, mount section first.
    pub fn override_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        for schema in OptionSchema::all() {
            let Some(fields) = self.overridden.get(schema.section()) else {
                continue;
            };
            for name in fields {
                let (Some(field), Some(value)) =
                    (schema.by_field(name), self.get(schema.section(), name))
                else {
                    continue;
                };
                flags.push(format!("--{}={}", field.flag, value.to_flag_value()));
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn baseline() -> SharedEnvironmentContext {
        SharedEnvironmentContext::empty()
            .with_value("vfs", "CacheMode", OptionValue::String("off".into()))
            .with_value("vfs", "CacheMaxSize", OptionValue::Size(-1))
            .with_value("mount", "AllowOther", OptionValue::Bool(false))
    }

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_overrides_are_typed() {
        let effective = baseline().overlay(&env(&[
            ("RCLONE_VFS_CACHE_MODE", "full"),
            ("RCLONE_VFS_CACHE_MAX_SIZE", "10G"),
            ("RCLONE_MOUNT_ALLOW_OTHER", "true"),
        ]));

        assert_eq!(
            effective.get("vfs", "CacheMode"),
            Some(&OptionValue::String("full".into()))
        );
        assert_eq!(effective.get("vfs", "CacheMaxSize"), Some(&OptionValue::Size(10 << 30)));
        assert_eq!(effective.get("mount", "AllowOther"), Some(&OptionValue::Bool(true)));
        assert!(effective.is_overridden("vfs", "CacheMode"));
    }

    #[test]
    fn test_bad_value_keeps_baseline() {
        let effective = baseline().overlay(&env(&[("RCLONE_MOUNT_ALLOW_OTHER", "sometimes")]));
        assert_eq!(effective.get("mount", "AllowOther"), Some(&OptionValue::Bool(false)));
        assert!(!effective.has_overrides());
    }

    #[test]
    fn test_unrelated_and_unknown_keys_ignored() {
        let effective = baseline().overlay(&env(&[
            ("RCLONE_CONFIG", "/data/rclone.conf"),
            ("RCLONE_VFS_FROBNICATE", "1"),
            ("HOME", "/root"),
        ]));
        assert!(!effective.has_overrides());
        assert!(effective.override_flags().is_empty());
        assert_eq!(effective.get("vfs", "CacheMaxSize"), Some(&OptionValue::Size(-1)));
    }

    #[test]
    fn test_override_flags() {
        let effective = baseline().overlay(&env(&[
            ("RCLONE_VFS_CACHE_MODE", "writes"),
            ("RCLONE_VFS_DIR_CACHE_TIME", "1m"),
            ("RCLONE_MOUNT_ALLOW_OTHER", "yes"),
        ]));

        assert_eq!(
            effective.override_flags(),
            vec![
                "--allow-other=true".to_string(),
                "--vfs-cache-mode=writes".to_string(),
                "--dir-cache-time=60000ms".to_string(),
            ]
        );
    }

    #[test]
    fn test_to_json() {
        let effective = baseline().overlay(&env(&[("RCLONE_VFS_CACHE_MAX_SIZE", "1M")]));
        let json = effective.to_json();
        assert_eq!(json["vfs"]["CacheMaxSize"], json!(1_048_576));
        assert_eq!(json["vfs"]["CacheMode"], json!("off"));
        assert_eq!(json["mount"]["AllowOther"], json!(false));
    }

    #[test]
    fn test_overlay_on_empty_context() {
        let effective =
            SharedEnvironmentContext::empty().overlay(&env(&[("RCLONE_VFS_CACHE_MODE", "full")]));
        assert_eq!(effective.override_flags(), vec!["--vfs-cache-mode=full".to_string()]);
    }
}
