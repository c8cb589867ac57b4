//! # ZoneDirectory
//!
//! Country allocations from a directory of ipdeny-style zone files: one
//! `<cc>.zone` file per country, one CIDR per line.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, warn};

use domains::{Cidr, CountryBlock, CountryRepository};

/// Placeholder code ipdeny uses for unassigned space.
const UNKNOWN_COUNTRY: &str = "zz";

pub struct ZoneDirectory {
    dir: PathBuf,
}

impl ZoneDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// `fr.zone` -> `Some("fr")`.
fn country_code(path: &Path) -> Option<String> {
    if path.extension()? != "zone" {
        return None;
    }
    let code = path.file_stem()?.to_str()?.to_ascii_lowercase();
    (code != UNKNOWN_COUNTRY).then_some(code)
}

fn parse_zone(country: &str, contents: &str) -> (Vec<CountryBlock>, usize) {
    let mut blocks = Vec::new();
    let mut skipped = 0;
    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Cidr::parse_lenient(line) {
            Ok(network) => blocks.push(CountryBlock { network, country: country.to_owned() }),
            Err(_) => skipped += 1,
        }
    }
    (blocks, skipped)
}

#[async_trait]
impl CountryRepository for ZoneDirectory {
    async fn load_all(&self) -> anyhow::Result<Vec<CountryBlock>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("reading zone directory {}", self.dir.display()))?;

        let mut blocks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(country) = country_code(&path) else { continue };

            let contents = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let (parsed, skipped) = parse_zone(&country, &contents);
            if skipped > 0 {
                warn!(file = %path.display(), skipped, "Malformed zone lines ignored");
            }
            debug!(country, blocks = parsed.len(), "Zone file read");
            blocks.extend(parsed);
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_code_from_file_name() {
        assert_eq!(country_code(Path::new("/z/FR.zone")), Some("fr".to_owned()));
        assert_eq!(country_code(Path::new("/z/zz.zone")), None);
        assert_eq!(country_code(Path::new("/z/README")), None);
        assert_eq!(country_code(Path::new("/z/de.zone.bak")), None);
    }

    #[test]
    fn test_parse_zone_skips_comments_and_garbage() {
        let (blocks, skipped) = parse_zone("de", "# header\n\n5.1.0.0/16\n  5.2.0.0/15  \nbogus\n");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].network.to_string(), "5.2.0.0/15");
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("fr.zone"), "2.0.0.0/12\n").await.unwrap();
        tokio::fs::write(dir.path().join("jp.zone"), "1.0.16.0/20\n1.1.64.0/18\n").await.unwrap();
        tokio::fs::write(dir.path().join("zz.zone"), "0.0.0.0/0\n").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "9.9.9.9/32\n").await.unwrap();

        let mut blocks = ZoneDirectory::new(dir.path()).load_all().await.unwrap();
        blocks.sort_by(|a, b| a.country.cmp(&b.country));

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].country, "fr");
        assert!(blocks.iter().all(|b| b.country != "zz"));
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ZoneDirectory::new(dir.path().join("absent")).load_all().await.is_err());
    }
}
