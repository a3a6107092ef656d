//! Parsed upload manifests ("changes" files).
//!
//! An upload declares its file set in a control-style manifest:
//! `Key: value` fields with indented continuation lines, and a
//! `Checksums-Sha256` list of `hash size filename` entries. The
//! manifest may arrive wrapped in the clear-sign armor produced by
//! the signer crate; [`ClearSigned::split`] peels that wrapper off so
//! the signature can be checked against the exact signed body.

use crate::version::DebVersion;
use serde::{Deserialize, Serialize};

/// One file declared by a manifest, with its expected digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesFile {
    /// File name as it will appear in the repository pool.
    pub name: String,
    /// Declared size in bytes, if the manifest carried one.
    pub size: Option<u64>,
    /// Expected SHA-256 digest (lowercase hex), if declared.
    pub sha256: Option<String>,
}

/// A parsed upload manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Changes {
    /// Source package name.
    pub source: String,
    /// Declared version.
    pub version: DebVersion,
    /// Target distribution named by the manifest, if any.
    pub distribution: Option<String>,
    /// Declared architectures.
    pub architectures: Vec<String>,
    /// The declared file set.
    pub files: Vec<ChangesFile>,
    /// Whether the manifest arrived inside signing armor.
    pub signed: bool,
    /// Whether the signature verified against a trusted key.
    pub validated: bool,
    /// True for a manifest synthesized from a lone package file.
    pub lone_package: bool,
}

impl Changes {
    /// Parse a plain (unarmored) control-style manifest body.
    pub fn parse(body: &str) -> crate::Result<Self> {
        let mut source = None;
        let mut version = None;
        let mut distribution = None;
        let mut architectures = Vec::new();
        let mut files = Vec::new();

        let mut in_checksums = false;
        for line in body.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                if in_checksums {
                    files.push(parse_checksum_line(line)?);
                }
                continue;
            }
            in_checksums = false;

            let (key, value) = line.split_once(':').ok_or_else(|| {
                crate::Error::InvalidManifest(format!("malformed field line {line:?}"))
            })?;
            let value = value.trim();
            match key {
                "Source" => source = Some(value.to_string()),
                "Version" => version = Some(DebVersion::parse(value)?),
                "Distribution" => distribution = Some(value.to_string()),
                "Architecture" => {
                    architectures = value.split_whitespace().map(str::to_string).collect()
                }
                "Checksums-Sha256" => in_checksums = true,
                _ => {}
            }
        }

        let source = source
            .ok_or_else(|| crate::Error::InvalidManifest("missing Source field".to_string()))?;
        let version = version
            .ok_or_else(|| crate::Error::InvalidManifest("missing Version field".to_string()))?;
        if files.is_empty() {
            return Err(crate::Error::InvalidManifest(
                "manifest declares no files".to_string(),
            ));
        }

        Ok(Self {
            source,
            version,
            distribution,
            architectures,
            files,
            signed: false,
            validated: false,
            lone_package: false,
        })
    }

    /// Synthesize a single-entry manifest for a lone package upload.
    ///
    /// The name, version and architecture are recovered from the
    /// conventional `name_version_arch.deb` file name; no expected
    /// digest exists, so checksum verification is skipped for it.
    pub fn from_lone_package(filename: &str) -> crate::Result<Self> {
        let (source, version, arch) = parse_package_filename(filename)?;
        Ok(Self {
            source,
            version,
            distribution: None,
            architectures: vec![arch],
            files: vec![ChangesFile {
                name: filename.to_string(),
                size: None,
                sha256: None,
            }],
            signed: false,
            validated: false,
            lone_package: true,
        })
    }

    /// Look up a declared file by name.
    pub fn file(&self, name: &str) -> Option<&ChangesFile> {
        self.files.iter().find(|f| f.name == name)
    }
}

fn parse_checksum_line(line: &str) -> crate::Result<ChangesFile> {
    let mut parts = line.split_whitespace();
    let (hash, size, name) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(s), Some(n), None) => (h, s, n),
        _ => {
            return Err(crate::Error::InvalidManifest(format!(
                "malformed checksum line {line:?}"
            )))
        }
    };
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(crate::Error::InvalidManifest(format!(
            "bad sha256 digest for {name}"
        )));
    }
    let size = size
        .parse::<u64>()
        .map_err(|_| crate::Error::InvalidManifest(format!("bad size for {name}")))?;
    if name.contains('/') || name.contains("..") {
        return Err(crate::Error::InvalidManifest(format!(
            "file name {name:?} contains path components"
        )));
    }
    Ok(ChangesFile {
        name: name.to_string(),
        size: Some(size),
        sha256: Some(hash.to_ascii_lowercase()),
    })
}

/// Split a `name_version_arch.deb` file name into its parts.
pub fn parse_package_filename(filename: &str) -> crate::Result<(String, DebVersion, String)> {
    let stem = filename.strip_suffix(".deb").ok_or_else(|| {
        crate::Error::InvalidManifest(format!("{filename:?} is not a .deb file"))
    })?;
    let mut parts = stem.split('_');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(version), Some(arch), None) if !name.is_empty() && !arch.is_empty() => {
            // Epochs render as `:` which is illegal in file names; the
            // conventional encoding is `%3a`.
            let version = DebVersion::parse(&version.replace("%3a", ":"))?;
            Ok((name.to_string(), version, arch.to_string()))
        }
        _ => Err(crate::Error::InvalidManifest(format!(
            "{filename:?} does not match name_version_arch.deb"
        ))),
    }
}

/// Armor line opening a clear-signed manifest.
pub const CLEARSIGN_HEADER: &str = "-----BEGIN APTFORGE SIGNED MESSAGE-----";
/// Armor line opening the signature block.
pub const SIGNATURE_HEADER: &str = "-----BEGIN APTFORGE SIGNATURE-----";
/// Armor line closing the signature block.
pub const SIGNATURE_FOOTER: &str = "-----END APTFORGE SIGNATURE-----";

/// A clear-signed document split into its signed body and signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClearSigned {
    /// The exact text the signature covers.
    pub body: String,
    /// Name of the signing key.
    pub key_name: String,
    /// Base64 ed25519 signature over `body`.
    pub signature: String,
}

impl ClearSigned {
    /// Whether a document carries clear-sign armor at all.
    pub fn is_armored(text: &str) -> bool {
        text.trim_start().starts_with(CLEARSIGN_HEADER)
    }

    /// Split an armored document. Fails on structurally bad armor.
    pub fn split(text: &str) -> crate::Result<Self> {
        let rest = text
            .trim_start()
            .strip_prefix(CLEARSIGN_HEADER)
            .ok_or(crate::Error::Unsigned)?;

        let (head, rest) = rest.split_once("\n\n").ok_or_else(|| {
            crate::Error::InvalidManifest("missing blank line after armor header".to_string())
        })?;
        let key_name = head
            .lines()
            .find_map(|l| l.strip_prefix("Key: "))
            .ok_or_else(|| {
                crate::Error::InvalidManifest("missing Key field in armor header".to_string())
            })?
            .trim()
            .to_string();

        let (body, tail) = rest.split_once(SIGNATURE_HEADER).ok_or_else(|| {
            crate::Error::InvalidManifest("missing signature block".to_string())
        })?;
        let sig = tail.split(SIGNATURE_FOOTER).next().unwrap_or_default();
        let signature: String = sig.split_whitespace().collect();
        if signature.is_empty() {
            return Err(crate::Error::InvalidManifest(
                "empty signature block".to_string(),
            ));
        }

        Ok(Self {
            body: body.to_string(),
            key_name,
            signature,
        })
    }

    /// Render a body and signature back into armored form.
    pub fn render(body: &str, key_name: &str, signature: &str) -> String {
        format!(
            "{CLEARSIGN_HEADER}\nKey: {key_name}\n\n{body}{SIGNATURE_HEADER}\n{signature}\n{SIGNATURE_FOOTER}\n"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Format: 1.8
Source: hello
Version: 2.10-3
Distribution: stable
Architecture: amd64
Checksums-Sha256:
 0000000000000000000000000000000000000000000000000000000000000001 1234 hello_2.10-3_amd64.deb
 0000000000000000000000000000000000000000000000000000000000000002 99 hello_2.10-3_amd64.buildinfo
";

    #[test]
    fn test_parse_manifest() {
        let changes = Changes::parse(SAMPLE).unwrap();
        assert_eq!(changes.source, "hello");
        assert_eq!(changes.version.to_string(), "2.10-3");
        assert_eq!(changes.distribution.as_deref(), Some("stable"));
        assert_eq!(changes.architectures, vec!["amd64"]);
        assert_eq!(changes.files.len(), 2);
        let f = changes.file("hello_2.10-3_amd64.deb").unwrap();
        assert_eq!(f.size, Some(1234));
        assert_eq!(
            f.sha256.as_deref(),
            Some("0000000000000000000000000000000000000000000000000000000000000001")
        );
        assert!(!changes.signed);
        assert!(!changes.lone_package);
    }

    #[test]
    fn test_parse_rejects_incomplete_manifests() {
        assert!(Changes::parse("Source: x\n").is_err());
        assert!(Changes::parse("Source: x\nVersion: 1.0\n").is_err());
        assert!(Changes::parse("Version: 1.0\nChecksums-Sha256:\n aa 1 f\n").is_err());
    }

    #[test]
    fn test_parse_rejects_path_components_in_names() {
        let bad = "Source: x\nVersion: 1.0\nChecksums-Sha256:\n \
                   0000000000000000000000000000000000000000000000000000000000000001 1 ../evil\n";
        assert!(Changes::parse(bad).is_err());
    }

    #[test]
    fn test_lone_package_manifest() {
        let changes = Changes::from_lone_package("tool_1.2-1_arm64.deb").unwrap();
        assert_eq!(changes.source, "tool");
        assert_eq!(changes.version.to_string(), "1.2-1");
        assert_eq!(changes.architectures, vec!["arm64"]);
        assert!(changes.lone_package);
        assert!(changes.files[0].sha256.is_none());

        assert!(Changes::from_lone_package("tool.deb").is_err());
        assert!(Changes::from_lone_package("tool_1.0_amd64.tar").is_err());
    }

    #[test]
    fn test_clearsign_roundtrip() {
        let armored = ClearSigned::render(SAMPLE, "repo-key-1", "c2lnbmF0dXJl");
        assert!(ClearSigned::is_armored(&armored));
        let split = ClearSigned::split(&armored).unwrap();
        assert_eq!(split.body, SAMPLE);
        assert_eq!(split.key_name, "repo-key-1");
        assert_eq!(split.signature, "c2lnbmF0dXJl");

        let inner = Changes::parse(&split.body).unwrap();
        assert_eq!(inner.source, "hello");
    }

    #[test]
    fn test_clearsign_split_rejects_bad_armor() {
        assert!(ClearSigned::split("no armor here").is_err());
        let missing_sig = format!("{CLEARSIGN_HEADER}\nKey: k\n\nbody\n");
        assert!(ClearSigned::split(&missing_sig).is_err());
    }
}
