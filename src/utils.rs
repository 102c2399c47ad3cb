use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use crate::errors::Result;

/// Reserved prefix for ad-hoc search references.
pub const SEARCH_PREFIX: &str = "ytsearch";

/// Normalizes a user-supplied source reference for cache keying and play counts.
pub fn normalize_source_ref(source_ref: &str) -> String {
    let trimmed = source_ref.trim();
    trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

pub fn is_search_ref(source_ref: &str) -> bool {
    source_ref.trim_start().starts_with(SEARCH_PREFIX)
}

/// Hex MD5 of a string, used as the cache key component.
pub fn hash_ref(source_ref: &str) -> String {
    format!("{:x}", md5::compute(source_ref.as_bytes()))
}

/// Mirrors yt-dlp's `--restrict-filenames` sanitising. Only used when the
/// backend did not report the filename itself.
pub fn sanitize_filename(filename: &str) -> String {
    let filename = match timestamp_pattern() {
        Some(pattern) => pattern.replace_all(filename, |caps: &regex::Captures| caps[0].replace(':', "_")),
        None => std::borrow::Cow::Borrowed(filename),
    };

    let mut out = String::with_capacity(filename.len());
    for c in filename.chars() {
        if let Some(plain) = unaccent(c) {
            out.push_str(plain);
            continue;
        }
        match c {
            '?' | '"' => {}
            c if (c as u32) < 32 || c as u32 == 127 => {}
            ':' => out.push_str("_-"),
            '\\' | '/' | '|' | '*' | '<' | '>' => out.push('_'),
            '!' | '&' | '\'' | '(' | ')' | '[' | ']' | '{' | '}' | '$' | ';' | '`' | '^' | ',' | '#' => out.push('_'),
            c if c.is_whitespace() => out.push('_'),
            c if !c.is_ascii() => {
                if !c.is_control() && !is_mark_or_format(c) {
                    out.push('_');
                }
            }
            c => out.push(c),
        }
    }

    let mut result = collapse_underscores(&out).trim_matches('_').to_string();
    if let Some(rest) = result.strip_prefix("-_") {
        result = rest.to_string();
    }
    if let Some(rest) = result.strip_prefix('-') {
        result = format!("_{}", rest);
    }
    let result = result.trim_start_matches('.');

    if result.is_empty() {
        "_".to_string()
    } else {
        result.to_string()
    }
}

/// `12:34` style timestamps keep their digits: `12_34`.
fn timestamp_pattern() -> Option<&'static regex::Regex> {
    static PATTERN: OnceLock<Option<regex::Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| regex::Regex::new(r"[0-9]+(?::[0-9]+)+").ok())
        .as_ref()
}

fn is_mark_or_format(c: char) -> bool {
    matches!(
        c as u32,
        0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x200B..=0x200F | 0x20D0..=0x20FF | 0xFE20..=0xFE2F | 0xFEFF
    )
}

fn unaccent(c: char) -> Option<&'static str> {
    let plain = match c {
        'Â' | 'Ã' | 'Ä' | 'À' | 'Á' | 'Å' => "A",
        'Æ' => "AE",
        'Ç' => "C",
        'È' | 'É' | 'Ê' | 'Ë' => "E",
        'Ì' | 'Í' | 'Î' | 'Ï' => "I",
        'Ð' => "D",
        'Ñ' => "N",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ő' | 'Ø' => "O",
        'Œ' => "OE",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ű' => "U",
        'Ý' => "Y",
        'Þ' => "TH",
        'ß' => "ss",
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'æ' => "ae",
        'ç' => "c",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'ð' => "o",
        'ñ' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ő' | 'ø' => "o",
        'œ' => "oe",
        'ù' | 'ú' | 'û' | 'ü' | 'ű' => "u",
        'ý' | 'ÿ' => "y",
        'þ' => "th",
        _ => return None,
    };
    Some(plain)
}

fn collapse_underscores(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_underscore = false;
    for c in s.chars() {
        if c == '_' {
            if !last_underscore {
                out.push(c);
            }
            last_underscore = true;
        } else {
            out.push(c);
            last_underscore = false;
        }
    }
    out
}

/// Last `len` hex chars of the MD5 of a file's contents. Blocking.
pub fn md5_fragment(path: &Path, len: usize) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        context.consume(&buf[..read]);
    }

    let digest = format!("{:x}", context.compute());
    let start = digest.len().saturating_sub(len);
    Ok(digest[start..].to_string())
}

/// Splits `name.ext` at the last dot. Names without a dot have no extension.
pub fn split_extension(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    }
}

pub async fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        log::info!("Created directory: {:?}", path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_embed_brackets() {
        assert_eq!(normalize_source_ref("  <https://a.b/c>  "), "https://a.b/c");
        assert_eq!(normalize_source_ref("https://a.b/c"), "https://a.b/c");
        assert_eq!(normalize_source_ref("<unterminated"), "<unterminated");
    }

    #[test]
    fn search_refs_are_detected() {
        assert!(is_search_ref("ytsearch:never gonna"));
        assert!(is_search_ref("ytsearch5:lofi"));
        assert!(!is_search_ref("https://youtube.com/watch?v=x"));
    }

    #[test]
    fn sanitize_restricts_characters() {
        assert_eq!(sanitize_filename("NOMA - Brain Power"), "NOMA_-_Brain_Power");
        assert_eq!(sanitize_filename("a/b:c"), "a_b_-c");
        assert_eq!(sanitize_filename("café"), "cafe");
        assert_eq!(sanitize_filename("???"), "_");
    }

    #[test]
    fn sanitize_matches_ytdlp_restricted_names() {
        assert_eq!(sanitize_filename("Song (Official Video)"), "Song_Official_Video");
        assert_eq!(sanitize_filename("What? \"Yes\": Live"), "What_Yes_-_Live");
        assert_eq!(sanitize_filename("Mix [1:02:03], Vol. 2!"), "Mix_1_02_03_Vol._2");
        assert_eq!(sanitize_filename("Rock & Roll"), "Rock_Roll");
        assert_eq!(sanitize_filename("日本"), "_");
        assert_eq!(sanitize_filename("-intro"), "_intro");
    }

    #[test]
    fn split_extension_handles_edge_cases() {
        assert_eq!(split_extension("a.b.m4a"), ("a.b", Some("m4a")));
        assert_eq!(split_extension("noext"), ("noext", None));
        assert_eq!(split_extension(".hidden"), (".hidden", None));
    }

    #[test]
    fn md5_fragment_takes_trailing_chars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello").unwrap();

        // md5("hello") = 5d41402abc4b2a76b9719d911017c592
        assert_eq!(md5_fragment(&path, 8).unwrap(), "1017c592");
    }
}
