//! Firmware info and settings table
//!
//! `$I` and `$$` are sent through the [`SingleCommandExecutor`]; their
//! response text is parsed here. Edited tables turn into `$n=value`
//! commands meant for the batch streamer.

use serde::Serialize;

use super::executor::SingleCommandExecutor;
use super::streamer::BatchJob;

/// Parsed `$I` response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FirmwareInfo {
    /// Firmware version
    pub version: Option<String>,
    /// Build string, when the banner carries one
    pub build: Option<String>,
    /// Compile options (`[OPT:...]`)
    pub options: Option<String>,
    /// Whether the version came from a pre-1.1 one-line banner
    pub legacy: bool,
}

fn bracketed<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    let start = line.find(tag)? + tag.len();
    let end = line.rfind(']')?;
    (end >= start).then(|| &line[start..end])
}

impl FirmwareInfo {
    /// Parse the text returned for `$I`.
    ///
    /// `[VER:<build>:<version>]` yields both fields; `[VER:<version>:]` or
    /// `[VER:<version>]` only the version. Without a `VER` line the first
    /// bracketed line is taken as a legacy banner.
    pub fn parse(text: &str) -> Self {
        let mut info = Self::default();

        for line in text.lines().map(str::trim) {
            if let Some(ver) = bracketed(line, "[VER:") {
                let ver = ver.trim_end_matches(':');
                match ver.split_once(':') {
                    Some((build, version)) if !version.is_empty() => {
                        info.build = Some(build.to_string());
                        info.version = Some(version.to_string());
                    }
                    _ => info.version = Some(ver.to_string()),
                }
            } else if let Some(opt) = bracketed(line, "[OPT:") {
                info.options = Some(opt.to_string());
            }
        }

        if info.version.is_none() {
            let banner = text
                .lines()
                .map(str::trim)
                .find(|line| {
                    line.starts_with('[') && line.ends_with(']') && !line.starts_with("[OPT:")
                });
            if let Some(banner) = banner {
                let inner = banner[1..banner.len() - 1].trim_end_matches(':');
                if !inner.is_empty() {
                    info.version = Some(inner.to_string());
                    info.legacy = true;
                }
            }
        }

        info
    }
}

/// Insertion-ordered `$$` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettingsTable {
    entries: Vec<(String, String)>,
}

impl SettingsTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every `key=value` line; other lines are skipped.
    pub fn parse(text: &str) -> Self {
        let mut table = Self::new();
        for line in text.lines() {
            let parts: Vec<&str> = line.trim().split('=').collect();
            if let [key, value] = parts.as_slice() {
                table.set(key.trim(), value.trim());
            }
        }
        table
    }

    /// Value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or update `key`; a new key goes to the end.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Entries in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `key=value` commands for every entry of `edited` that differs from
    /// this table, in `edited`'s order.
    pub fn changes_to(&self, edited: &SettingsTable) -> Vec<String> {
        edited
            .iter()
            .filter(|(key, value)| self.get(key) != Some(*value))
            .map(|(key, value)| format!("{}={}", key, value))
            .collect()
    }

    /// [`changes_to`](Self::changes_to) as a batch job
    pub fn change_job(&self, edited: &SettingsTable) -> BatchJob {
        BatchJob::new(self.changes_to(edited))
    }
}

/// Reads `$I` and `$$` through a single-command executor
#[derive(Debug, Clone)]
pub struct SettingsReader {
    executor: SingleCommandExecutor,
}

impl SettingsReader {
    /// Create a reader
    pub fn new(executor: SingleCommandExecutor) -> Self {
        Self { executor }
    }

    /// Query and parse `$I`
    pub async fn read_info(&self) -> FirmwareInfo {
        let text = self.executor.execute("$I").await;
        let info = FirmwareInfo::parse(&text);
        tracing::info!(
            "Firmware version {}",
            info.version.as_deref().unwrap_or("unknown")
        );
        info
    }

    /// Query and parse `$$`
    pub async fn read_settings(&self) -> SettingsTable {
        let text = self.executor.execute("$$").await;
        let table = SettingsTable::parse(&text);
        tracing::debug!("Read {} settings", table.len());
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grbl_11_info() {
        let info = FirmwareInfo::parse("[VER:1.1h.20190825:]\n[OPT:V,15,128]\n");
        assert_eq!(info.version.as_deref(), Some("1.1h.20190825"));
        assert_eq!(info.build, None);
        assert_eq!(info.options.as_deref(), Some("V,15,128"));
        assert!(!info.legacy);
    }

    #[test]
    fn test_parse_info_with_build() {
        let info = FirmwareInfo::parse("[VER:1.1f.20170801:LaserBox]\n[OPT:VL,15,128]\n");
        assert_eq!(info.build.as_deref(), Some("1.1f.20170801"));
        assert_eq!(info.version.as_deref(), Some("LaserBox"));
    }

    #[test]
    fn test_parse_legacy_banner() {
        let info = FirmwareInfo::parse("[0.9j.20160303:]\n");
        assert_eq!(info.version.as_deref(), Some("0.9j.20160303"));
        assert!(info.legacy);
    }

    #[test]
    fn test_parse_nothing() {
        assert_eq!(FirmwareInfo::parse("error:3\n"), FirmwareInfo::default());
    }

    #[test]
    fn test_settings_table_order_and_filtering() {
        let table = SettingsTable::parse("$0=10\n$1=25\nGrbl 1.1h\n$110=500.000\na=b=c\n");
        let keys: Vec<&str> = table.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["$0", "$1", "$110"]);
        assert_eq!(table.get("$110"), Some("500.000"));
    }

    #[test]
    fn test_changes_to() {
        let read = SettingsTable::parse("$0=10\n$1=25\n$110=500.000\n");
        let mut edited = read.clone();
        edited.set("$1", "255");
        edited.set("$110", "600.000");

        assert_eq!(read.changes_to(&edited), vec!["$1=255", "$110=600.000"]);
        assert!(read.changes_to(&read).is_empty());
        assert_eq!(read.change_job(&edited).commands.len(), 2);
    }
}
