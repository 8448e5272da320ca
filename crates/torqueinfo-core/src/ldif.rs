//! Map published share identifiers to local queue names.
//!
//! The BDII keeps static LDIF files; each entry's DN is mapped to the queue
//! attribute of the same entry.

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use thiserror::Error;

pub const DEFAULT_LDIF_DIR: &str = "/var/lib/bdii/gip/ldif";

static BDII_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*BDII_([^=\s]+)\s*=(.+)$").expect("bdii option regex"));

static GLUE1_DN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^dn:\s*GlueCEUniqueID\s*=\s*.+").expect("glue1 dn regex"));
static GLUE1_QUEUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^GlueCEName\s*:\s*(.+)").expect("glue1 queue regex"));

static GLUE2_SHARE_DN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^dn:\s*GLUE2ShareID\s*=\s*.+").expect("glue2 share dn regex"));
static GLUE2_QUEUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^GLUE2ComputingShareMappingQueue\s*:\s*(.+)").expect("glue2 queue regex")
});

static GLUE2_MANAGER_DN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^dn:\s*GLUE2ManagerId\s*=\s*.+").expect("glue2 manager dn regex"));
static GLUE2_MANAGER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^GLUE2ManagerID\s*:\s*(.+)").expect("glue2 manager regex"));

#[derive(Error, Debug)]
pub enum LdifError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn read(path: &Utf8Path) -> Result<String, LdifError> {
    fs::read_to_string(path).map_err(|source| LdifError::Io {
        path: path.to_owned(),
        source,
    })
}

/// `BDII_*` settings from the BDII configuration, keys lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BdiiConfig {
    values: BTreeMap<String, String>,
}

impl BdiiConfig {
    pub fn load(path: &Utf8Path) -> Result<Self, LdifError> {
        Ok(Self::parse(&read(path)?))
    }

    pub fn parse(text: &str) -> Self {
        let values = text
            .lines()
            .filter_map(|line| BDII_OPTION.captures(line))
            .map(|caps| (caps[1].to_ascii_lowercase(), caps[2].trim().to_string()))
            .collect();
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn ldif_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.get("ldif_dir").unwrap_or(DEFAULT_LDIF_DIR))
    }
}

/// GLUE2 share and manager maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Glue2Mapping {
    /// share DN -> queue
    pub shares: BTreeMap<String, String>,
    /// manager DN -> manager id
    pub managers: BTreeMap<String, String>,
}

/// Map `GlueCEUniqueID` DNs to `GlueCEName`.
///
/// `static-file-CE.ldif` alone is read when present.
pub fn glue1_queue_map(ldif_dir: &Utf8Path) -> Result<BTreeMap<String, String>, LdifError> {
    let files = select_files(ldif_dir, &["static-file-CE.ldif"])?;

    let mut rule = EntryRule::new(&GLUE1_DN, &GLUE1_QUEUE);
    for path in &files {
        map_entries(&read(path)?, std::slice::from_mut(&mut rule));
    }
    Ok(rule.found)
}

/// Map `GLUE2ShareID` DNs to their mapping queue and `GLUE2ManagerId` DNs to
/// their manager id.
///
/// `ComputingManager.ldif` and `ComputingShare.ldif` alone are read when both
/// are present.
pub fn glue2_queue_map(ldif_dir: &Utf8Path) -> Result<Glue2Mapping, LdifError> {
    let files = select_files(ldif_dir, &["ComputingManager.ldif", "ComputingShare.ldif"])?;

    let mut rules = [
        EntryRule::new(&GLUE2_SHARE_DN, &GLUE2_QUEUE),
        EntryRule::new(&GLUE2_MANAGER_DN, &GLUE2_MANAGER),
    ];
    for path in &files {
        map_entries(&read(path)?, &mut rules);
    }

    let [shares, managers] = rules;
    Ok(Glue2Mapping {
        shares: shares.found,
        managers: managers.found,
    })
}

/// `*.ldif` files of the directory, or just `shortcut` when all of them exist.
fn select_files(dir: &Utf8Path, shortcut: &[&str]) -> Result<Vec<Utf8PathBuf>, LdifError> {
    let entries = match dir.read_dir_utf8() {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(%dir, "no LDIF directory");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(LdifError::Io {
                path: dir.to_owned(),
                source,
            });
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| LdifError::Io {
            path: dir.to_owned(),
            source,
        })?;
        if entry.path().extension() == Some("ldif") {
            files.push(entry.into_path());
        }
    }
    files.sort();

    let preferred: Vec<Utf8PathBuf> = shortcut.iter().map(|name| dir.join(name)).collect();
    if preferred.iter().all(|p| files.contains(p)) {
        return Ok(preferred);
    }
    Ok(files)
}

/// One DN pattern and the attribute mapped from entries it opens.
struct EntryRule {
    dn: &'static Lazy<Regex>,
    attribute: &'static Lazy<Regex>,
    current: Option<String>,
    found: BTreeMap<String, String>,
}

impl EntryRule {
    fn new(dn: &'static Lazy<Regex>, attribute: &'static Lazy<Regex>) -> Self {
        Self {
            dn,
            attribute,
            current: None,
            found: BTreeMap::new(),
        }
    }
}

fn map_entries(text: &str, rules: &mut [EntryRule]) {
    'lines: for line in text.lines() {
        for rule in rules.iter_mut() {
            if rule.dn.is_match(line) {
                rule.current = Some(line.trim().to_string());
                continue 'lines;
            }
            if let Some(caps) = rule.attribute.captures(line) {
                if let Some(dn) = &rule.current {
                    rule.found.insert(dn.clone(), caps[1].trim().to_string());
                    continue 'lines;
                }
            }
        }

        if line.trim().is_empty() {
            for rule in rules.iter_mut() {
                rule.current = None;
            }
        }
    }
}
