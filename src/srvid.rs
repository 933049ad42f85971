//! Channel-name (`srvid2`) lookup table: `lookup(caid, sid)` resolves a
//! human-readable channel name for ECM-trace logging only — it has no
//! bearing on any access-control decision.
//!
//! Reload semantics mirror the account store: parse off the critical
//! path, then swap the whole table under one lock.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;

/// One parsed `ncam.srvid2` line: `SID:CAID1[,CAID2,...]|name|type||provider`.
#[derive(Debug, Clone)]
struct Entry {
    name: String,
}

/// Reloadable `(caid, sid) -> channel name` table.
pub struct SrvidTable {
    inner: RwLock<HashMap<(u16, u16), Entry>>,
}

impl SrvidTable {
    pub fn new() -> Self {
        SrvidTable {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub async fn lookup(&self, caid: u16, sid: u16) -> Option<String> {
        self.inner
            .read()
            .await
            .get(&(caid, sid))
            .map(|e| e.name.clone())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Replaces the whole table with freshly parsed entries.
    pub async fn replace_all(&self, text: &str) {
        let parsed = parse_srvid2(text);
        let mut inner = self.inner.write().await;
        *inner = parsed;
    }
}

impl Default for SrvidTable {
    fn default() -> Self {
        SrvidTable::new()
    }
}

/// Parses `ncam.srvid2`-format text: one `SID:CAID1[,CAID2,...]|name|type||provider`
/// entry per line. `#`-prefixed and blank lines are skipped. A line with
/// fewer than the `SID:CAIDs|name` prefix is skipped with a warning rather
/// than aborting the whole reload, matching the account config loader's
/// tolerance for malformed individual entries.
fn parse_srvid2(text: &str) -> HashMap<(u16, u16), Entry> {
    let mut table = HashMap::new();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.splitn(5, '|');
        let Some(sid_caids) = fields.next() else { continue };
        let Some(name) = fields.next() else { continue };

        let Some((sid_str, caids_str)) = sid_caids.split_once(':') else {
            warn!(line, "malformed srvid2 line, missing SID:CAID prefix");
            continue;
        };
        let Ok(sid) = u16::from_str_radix(sid_str.trim(), 16) else {
            warn!(line, "malformed srvid2 SID field");
            continue;
        };

        let mut any_caid = false;
        for caid_str in caids_str.split(',') {
            let Ok(caid) = u16::from_str_radix(caid_str.trim(), 16) else {
                continue;
            };
            any_caid = true;
            table.insert(
                (caid, sid),
                Entry {
                    name: name.trim().to_string(),
                },
            );
        }
        if !any_caid {
            warn!(line, "srvid2 line named no parseable CAID");
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# comment line
0064:0B00|Demo Channel One|1||ProviderX
00C8:0B00,0B01|Shared Channel|1||ProviderX
";

    #[tokio::test]
    async fn looks_up_entry_by_caid_and_sid() {
        let table = SrvidTable::new();
        table.replace_all(SAMPLE).await;
        assert_eq!(
            table.lookup(0x0b00, 0x0064).await,
            Some("Demo Channel One".to_string())
        );
    }

    #[tokio::test]
    async fn one_line_can_cover_multiple_caids() {
        let table = SrvidTable::new();
        table.replace_all(SAMPLE).await;
        assert_eq!(table.lookup(0x0b00, 0x00c8).await, Some("Shared Channel".to_string()));
        assert_eq!(table.lookup(0x0b01, 0x00c8).await, Some("Shared Channel".to_string()));
    }

    #[tokio::test]
    async fn unknown_pair_misses() {
        let table = SrvidTable::new();
        table.replace_all(SAMPLE).await;
        assert_eq!(table.lookup(0x0c00, 0x0064).await, None);
    }

    #[tokio::test]
    async fn reload_replaces_the_whole_table() {
        let table = SrvidTable::new();
        table.replace_all(SAMPLE).await;
        table.replace_all("0001:0B00|Only This One|1||P\n").await;
        assert_eq!(table.lookup(0x0b00, 0x0064).await, None);
        assert_eq!(table.lookup(0x0b00, 0x0001).await, Some("Only This One".to_string()));
    }
}
