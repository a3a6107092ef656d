//! Version retention rules.
//!
//! Rules are a comma-separated list of `glob:keep` entries. For items
//! whose package name matches the glob, at most `keep` of the newest
//! versions per (name, architecture) survive a publish; `keep` of zero
//! retains everything. The first matching rule wins.

use crate::error::{ArchiveError, ArchiveResult};
use aptforge_core::release::ReleaseItem;
use regex::Regex;

struct PruneRule {
    pattern: Regex,
    keep: u32,
}

/// A parsed rule set.
#[derive(Default)]
pub struct PruneRules {
    rules: Vec<PruneRule>,
}

impl PruneRules {
    /// Parse a rule string. Empty input keeps everything.
    pub fn parse(s: &str) -> ArchiveResult<Self> {
        let mut rules = Vec::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (glob, keep) = entry
                .rsplit_once(':')
                .ok_or_else(|| ArchiveError::InvalidRules(format!("{entry:?}: missing ':'")))?;
            let keep = keep.parse::<u32>().map_err(|_| {
                ArchiveError::InvalidRules(format!("{entry:?}: bad keep count {keep:?}"))
            })?;
            let pattern = glob_to_regex(glob)
                .map_err(|e| ArchiveError::InvalidRules(format!("{entry:?}: {e}")))?;
            rules.push(PruneRule { pattern, keep });
        }
        Ok(Self { rules })
    }

    /// The retention limit for a package name, if any rule matches.
    /// `None` means unlimited.
    fn limit_for(&self, name: &str) -> Option<u32> {
        self.rules
            .iter()
            .find(|r| r.pattern.is_match(name))
            .and_then(|r| (r.keep > 0).then_some(r.keep))
    }

    /// Apply the rules to an index already in release order, returning
    /// the surviving items. Within each (name, architecture) run the
    /// newest versions come first, so retention is a prefix take.
    pub fn apply(&self, items: Vec<ReleaseItem>) -> Vec<ReleaseItem> {
        if self.rules.is_empty() {
            return items;
        }
        let mut out: Vec<ReleaseItem> = Vec::with_capacity(items.len());
        let mut run_kept = 0u32;
        for item in items {
            let new_run = match out.last() {
                Some(prev) => prev.name != item.name || prev.architecture != item.architecture,
                None => true,
            };
            if new_run {
                run_kept = 0;
            }
            match self.limit_for(&item.name) {
                Some(limit) if run_kept >= limit => continue,
                _ => {}
            }
            run_kept += 1;
            out.push(item);
        }
        out
    }
}

fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aptforge_core::release::{release_index_cmp, ItemKind, ReleaseItemFile};
    use aptforge_core::{DebVersion, StoreId};

    fn item(name: &str, version: &str, arch: &str) -> ReleaseItem {
        let file = format!("{name}_{version}_{arch}.deb");
        ReleaseItem {
            kind: ItemKind::Binary,
            name: name.to_string(),
            version: DebVersion::parse(version).unwrap(),
            component: "main".to_string(),
            architecture: arch.to_string(),
            control_id: StoreId::compute(file.as_bytes()),
            files: vec![ReleaseItemFile {
                name: file.clone(),
                id: StoreId::compute(file.as_bytes()),
            }],
        }
    }

    fn sorted(mut items: Vec<ReleaseItem>) -> Vec<ReleaseItem> {
        items.sort_by(release_index_cmp);
        items
    }

    #[test]
    fn test_parse_rejects_bad_rules() {
        assert!(PruneRules::parse("nocolon").is_err());
        assert!(PruneRules::parse("pkg:notanumber").is_err());
        assert!(PruneRules::parse("pkg:-1").is_err());
        assert!(PruneRules::parse("").unwrap().rules.is_empty());
        assert!(PruneRules::parse("*:2,lib*:0").is_ok());
    }

    #[test]
    fn test_keeps_newest_versions_per_name_and_arch() {
        let rules = PruneRules::parse("*:2").unwrap();
        let items = sorted(vec![
            item("bash", "5.0", "amd64"),
            item("bash", "5.1", "amd64"),
            item("bash", "5.2", "amd64"),
            item("bash", "5.2", "arm64"),
        ]);
        let kept = rules.apply(items);
        let got: Vec<_> = kept
            .iter()
            .map(|i| format!("{}/{}", i.architecture, i.version))
            .collect();
        assert_eq!(got, vec!["amd64/5.2", "amd64/5.1", "arm64/5.2"]);
    }

    #[test]
    fn test_zero_keep_is_unlimited_and_first_match_wins() {
        let rules = PruneRules::parse("lib*:0,*:1").unwrap();
        let items = sorted(vec![
            item("libfoo", "1.0", "amd64"),
            item("libfoo", "2.0", "amd64"),
            item("tool", "1.0", "amd64"),
            item("tool", "2.0", "amd64"),
        ]);
        let kept = rules.apply(items);
        let got: Vec<_> = kept
            .iter()
            .map(|i| format!("{}/{}", i.name, i.version))
            .collect();
        assert_eq!(got, vec!["libfoo/2.0", "libfoo/1.0", "tool/2.0"]);
    }

    #[test]
    fn test_unmatched_names_are_untouched() {
        let rules = PruneRules::parse("other:1").unwrap();
        let items = sorted(vec![item("bash", "5.0", "amd64"), item("bash", "5.2", "amd64")]);
        assert_eq!(rules.apply(items).len(), 2);
    }
}
