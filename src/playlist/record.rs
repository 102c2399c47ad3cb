use serde::{Deserialize, Serialize};
use crate::downloader::{Entry, EntryContext};
use crate::errors::Result;

/// Persisted form of a queued entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRecord {
    #[serde(alias = "url")]
    pub source_ref: String,
    #[serde(default)]
    pub meta: RecordMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    #[serde(default, alias = "author", skip_serializing_if = "Option::is_none")]
    pub context_actor_id: Option<String>,
    #[serde(default, alias = "channel", skip_serializing_if = "Option::is_none")]
    pub context_channel_id: Option<String>,
    #[serde(default, alias = "seek")]
    pub seek_offset_seconds: f64,
}

impl EntryRecord {
    pub fn from_entry(entry: &Entry) -> Self {
        let context = entry.context();
        Self {
            source_ref: entry.source_ref().to_string(),
            meta: RecordMeta {
                context_actor_id: context.actor_id.clone(),
                context_channel_id: context.channel_id.clone(),
                seek_offset_seconds: context.seek_offset_seconds,
            },
        }
    }

    pub fn context(&self) -> EntryContext {
        EntryContext {
            actor_id: self.meta.context_actor_id.clone(),
            channel_id: self.meta.context_channel_id.clone(),
            seek_offset_seconds: self.meta.seek_offset_seconds,
            ..EntryContext::default()
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a stored record. Legacy binary records are scanned for a URL;
    /// `None` means the record is unusable and should be dropped.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if let Ok(record) = serde_json::from_slice::<EntryRecord>(raw) {
            return Some(record);
        }

        let source_ref = legacy_url(raw)?;
        log::debug!("📼 [QUEUE] Recovered legacy record for {}", source_ref);
        Some(Self {
            source_ref,
            meta: RecordMeta::default(),
        })
    }
}

/// Recovers the first http(s) URL stored as a string in a legacy pickled
/// record. Only string opcodes are read, so the bytes that follow a string
/// (memo writes, frame markers) never bleed into the URL. Every offset is
/// tried as an opcode; a false hit must still decode to a full URL.
fn legacy_url(raw: &[u8]) -> Option<String> {
    (0..raw.len()).find_map(|pos| {
        let text = match raw[pos] {
            // SHORT_BINUNICODE, SHORT_BINSTRING
            0x8c | b'U' => length_prefixed(raw, pos + 1, 1),
            // BINUNICODE, BINSTRING
            b'X' | b'T' => length_prefixed(raw, pos + 1, 4),
            // BINUNICODE8
            0x8d => length_prefixed(raw, pos + 1, 8),
            // UNICODE, STRING (protocol 0, newline terminated)
            b'V' | b'S' => line(raw, pos + 1),
            _ => None,
        };
        text.and_then(as_url)
    })
}

/// Reads a little-endian length of `width` bytes at `pos`, then that many
/// bytes as UTF-8.
fn length_prefixed(raw: &[u8], pos: usize, width: usize) -> Option<&str> {
    let header = raw.get(pos..pos + width)?;
    let len = header
        .iter()
        .rev()
        .try_fold(0usize, |acc, &b| acc.checked_mul(256)?.checked_add(b as usize))?;
    let start = pos + width;
    let body = raw.get(start..start.checked_add(len)?)?;
    std::str::from_utf8(body).ok()
}

fn line(raw: &[u8], pos: usize) -> Option<&str> {
    let rest = raw.get(pos..)?;
    let end = rest.iter().position(|&b| b == b'\n')?;
    let text = std::str::from_utf8(&rest[..end]).ok()?;
    Some(text.trim_matches(|c| c == '\'' || c == '"'))
}

fn as_url(text: &str) -> Option<String> {
    if !(text.starts_with("http://") || text.starts_with("https://")) {
        return None;
    }
    let parsed = url::Url::parse(text).ok()?;
    parsed.host()?;
    Some(text.to_string())
}
