//! Explicit field tables for the option sections the manager overlays.

use super::value::FieldType;

/// One overridable option field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionField {
    /// Normalized command-line flag name, e.g. `vfs-cache-mode`.
    pub flag: &'static str,
    /// Field name in the daemon's `options/get` output, e.g. `CacheMode`.
    pub field: &'static str,
    pub field_type: FieldType,
}

const fn field(flag: &'static str, name: &'static str, field_type: FieldType) -> OptionField {
    OptionField {
        flag,
        field: name,
        field_type,
    }
}

const MOUNT_FIELDS: &[OptionField] = &[
    field("debug-fuse", "DebugFUSE", FieldType::Bool),
    field("attr-timeout", "AttrTimeout", FieldType::Duration),
    field("daemon", "Daemon", FieldType::Bool),
    field("daemon-wait", "DaemonWait", FieldType::Duration),
    field("daemon-timeout", "DaemonTimeout", FieldType::Duration),
    field("default-permissions", "DefaultPermissions", FieldType::Bool),
    field("allow-non-empty", "AllowNonEmpty", FieldType::Bool),
    field("allow-root", "AllowRoot", FieldType::Bool),
    field("allow-other", "AllowOther", FieldType::Bool),
    field("async-read", "AsyncRead", FieldType::Bool),
    field("max-read-ahead", "MaxReadAhead", FieldType::Size),
    field("write-back-cache", "WritebackCache", FieldType::Bool),
    field("volname", "VolumeName", FieldType::String),
    field("noappledouble", "NoAppleDouble", FieldType::Bool),
    field("noapplexattr", "NoAppleXattr", FieldType::Bool),
    field("network-mode", "NetworkMode", FieldType::Bool),
    field("direct-io", "DirectIO", FieldType::Bool),
    field("devname", "DeviceName", FieldType::String),
    field("mount-case-insensitive", "CaseInsensitive", FieldType::String),
];

const VFS_FIELDS: &[OptionField] = &[
    field("no-seek", "NoSeek", FieldType::Bool),
    field("no-checksum", "NoChecksum", FieldType::Bool),
    field("read-only", "ReadOnly", FieldType::Bool),
    field("no-modtime", "NoModTime", FieldType::Bool),
    field("dir-cache-time", "DirCacheTime", FieldType::Duration),
    field("vfs-refresh", "Refresh", FieldType::Bool),
    field("poll-interval", "PollInterval", FieldType::Duration),
    field("uid", "UID", FieldType::Integer),
    field("gid", "GID", FieldType::Integer),
    field("vfs-read-chunk-size", "ChunkSize", FieldType::Size),
    field("vfs-read-chunk-size-limit", "ChunkSizeLimit", FieldType::Size),
    field("vfs-read-chunk-streams", "ChunkStreams", FieldType::Integer),
    field("vfs-cache-mode", "CacheMode", FieldType::String),
    field("vfs-cache-max-age", "CacheMaxAge", FieldType::Duration),
    field("vfs-cache-max-size", "CacheMaxSize", FieldType::Size),
    field("vfs-cache-min-free-space", "CacheMinFreeSpace", FieldType::Size),
    field("vfs-cache-poll-interval", "CachePollInterval", FieldType::Duration),
    field("vfs-case-insensitive", "CaseInsensitive", FieldType::Bool),
    field("vfs-block-norm-dupes", "BlockNormDupes", FieldType::Bool),
    field("vfs-write-wait", "WriteWait", FieldType::Duration),
    field("vfs-read-wait", "ReadWait", FieldType::Duration),
    field("vfs-write-back", "WriteBack", FieldType::Duration),
    field("vfs-read-ahead", "ReadAhead", FieldType::Size),
    field("vfs-used-is-size", "UsedIsSize", FieldType::Bool),
    field("vfs-fast-fingerprint", "FastFingerprint", FieldType::Bool),
    field("vfs-disk-space-total-size", "DiskSpaceTotalSize", FieldType::Size),
];

static MOUNT: OptionSchema = OptionSchema {
    section: "mount",
    fields: MOUNT_FIELDS,
};

static VFS: OptionSchema = OptionSchema {
    section: "vfs",
    fields: VFS_FIELDS,
};

/// Field table for one option section.
#[derive(Debug)]
pub struct OptionSchema {
    section: &'static str,
    fields: &'static [OptionField],
}

impl OptionSchema {
    pub fn mount() -> &'static OptionSchema {
        &MOUNT
    }

    pub fn vfs() -> &'static OptionSchema {
        &VFS
    }

    /// All known sections, in overlay order.
    pub fn all() -> [&'static OptionSchema; 2] {
        [&MOUNT, &VFS]
    }

    pub fn for_section(section: &str) -> Option<&'static OptionSchema> {
        Self::all().into_iter().find(|schema| schema.section == section)
    }

    pub fn section(&self) -> &'static str {
        self.section
    }

    pub fn fields(&self) -> &'static [OptionField] {
        self.fields
    }

    pub fn by_flag(&self, flag: &str) -> Option<&'static OptionField> {
        self.fields.iter().find(|f| f.flag == flag)
    }

    pub fn by_field(&self, name: &str) -> Option<&'static OptionField> {
        self.fields.iter().find(|f| f.field == name)
    }

    /// Environment prefix owned by this section, e.g. `RCLONE_VFS_`.
    pub fn env_prefix(&self) -> String {
        format!("RCLONE_{}_", self.section.to_ascii_uppercase())
    }

    /// Map an environment key onto a field of this section.
    ///
    /// Returns `None` when the key does not carry this section's prefix,
    /// `Some(Err(flag))` when it does but names no known field, and
    /// `Some(Ok(field))` on a match.
    pub fn resolve_env_key(&self, key: &str) -> Option<Result<&'static OptionField, String>> {
        let rest = key.strip_prefix(&self.env_prefix())?;
        let normalized = rest.to_ascii_lowercase().replace('_', "-");

        let mut candidates = Vec::with_capacity(2);
        if self.section == "vfs" && !normalized.starts_with("vfs-") {
            candidates.push(format!("vfs-{}", normalized));
        }
        candidates.push(normalized);

        let found = candidates.iter().find_map(|flag| self.by_flag(flag));
        Some(match found {
            Some(field) => Ok(field),
            None => Err(candidates.swap_remove(0)),
        })
    }
}
