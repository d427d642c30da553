//! Deterministic keys and identifiers
//!
//! Every write in the pipeline is addressed by a key derived purely from
//! the asset identity, which is what makes duplicate deliveries collapse
//! onto the same document and the same blob.

use url::Url;

use crate::app::models::AssetType;
use crate::constants::storage;

/// Escape a storage key so it can be used as a document id
///
/// `%` is replaced first so that the later substitutions cannot be
/// confused with pre-existing escape sequences.
pub fn escape_key(key: &str) -> String {
    key.replace('%', "%25")
        .replace('/', "%2F")
        .replace('.', "%2E")
}

/// Inverse of [`escape_key`]
///
/// Returns `None` for strings that `escape_key` can never produce.
pub fn unescape_key(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let sequence = rest.get(pos..pos + 3)?;
        match sequence {
            "%25" => out.push('%'),
            "%2F" => out.push('/'),
            "%2E" => out.push('.'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);

    // A literal '/' or '.' in the input was never produced by escape_key.
    if escape_key(&out) != escaped {
        return None;
    }
    Some(out)
}

/// Blob store key: `{type}/{sourceId}{ext}` or `{type}/{sourceId}_p{page}{ext}`
pub fn storage_key(
    asset_type: AssetType,
    source_id: u64,
    page: Option<u32>,
    extension: &str,
) -> String {
    match page {
        Some(page) => format!("{}/{}_p{}{}", asset_type, source_id, page, extension),
        None => format!("{}/{}{}", asset_type, source_id, extension),
    }
}

/// Ranking record document id for key `(date, mode, sourceId)`
pub fn ranking_document_id(date: &str, mode: &str, source_id: u64) -> String {
    escape_key(&format!("{}_{}_{}", date, mode, source_id))
}

/// Page metadata cache document id
pub fn page_metadata_document_id(asset_type: AssetType, source_id: u64) -> String {
    format!("{}_{}", asset_type, source_id)
}

/// Lowercased extension (with leading dot) of the last path segment of a URL
///
/// Query strings and fragments are ignored. Returns `None` when the last
/// segment has no extension.
pub fn extension_of(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let file_name = path.rsplit('/').next()?;
    let dot = file_name.rfind('.')?;
    let extension = &file_name[dot..];
    if extension.len() <= 1 {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

/// Whether the download worker accepts this extension
pub fn is_supported_extension(extension: &str) -> bool {
    let lowered = extension.to_ascii_lowercase();
    storage::SUPPORTED_EXTENSIONS.contains(&lowered.as_str())
}

/// MIME type for a supported extension
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        ".jpg" | ".jpeg" => "image/jpeg",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_escape_examples() {
        assert_eq!(escape_key("pixiv/42_p0.png"), "pixiv%2F42_p0%2Epng");
        assert_eq!(escape_key("a%2Fb"), "a%252Fb");
        assert_eq!(escape_key("danbooru/7.jpg"), "danbooru%2F7%2Ejpg");
    }

    #[test]
    fn test_percent_is_escaped_first() {
        // A literal "%2F" must not collide with an escaped '/'.
        assert_ne!(escape_key("a%2Fb"), escape_key("a/b"));
        assert_eq!(unescape_key("a%252Fb").as_deref(), Some("a%2Fb"));
    }

    #[test]
    fn test_unescape_rejects_foreign_sequences() {
        assert_eq!(unescape_key("abc%41"), None);
        assert_eq!(unescape_key("trailing%2"), None);
        assert_eq!(unescape_key("raw/slash"), None);
    }

    #[test]
    fn test_storage_keys() {
        assert_eq!(
            storage_key(AssetType::Danbooru, 7, None, ".jpg"),
            "danbooru/7.jpg"
        );
        assert_eq!(
            storage_key(AssetType::Pixiv, 42, Some(2), ".png"),
            "pixiv/42_p2.png"
        );
    }

    #[test]
    fn test_ranking_document_id() {
        assert_eq!(
            ranking_document_id("2024-05-01", "daily", 42),
            "2024-05-01_daily_42"
        );
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(
            extension_of("https://i.pximg.net/img-original/img/2024/05/01/42_p0.PNG").as_deref(),
            Some(".png")
        );
        assert_eq!(
            extension_of("https://cdn.example.com/data/abc.jpeg?e=123&m=x.zip").as_deref(),
            Some(".jpeg")
        );
        assert_eq!(extension_of("https://cdn.example.com/data/noext"), None);
        assert_eq!(extension_of("https://cdn.example.com/dir.d/"), None);
        assert_eq!(extension_of("/local/path/file.webp").as_deref(), Some(".webp"));
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_extension(".jpg"));
        assert!(is_supported_extension(".WEBP"));
        assert!(!is_supported_extension(".mp4"));
        assert!(!is_supported_extension(".zip"));
        assert_eq!(content_type_for(".JPG"), "image/jpeg");
        assert_eq!(content_type_for(".bin"), "application/octet-stream");
    }

    proptest! {
        #[test]
        fn prop_escape_is_injective(
            a in "[A-Za-z0-9/._%-]{0,24}",
            b in "[A-Za-z0-9/._%-]{0,24}",
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(escape_key(&a), escape_key(&b));
        }

        #[test]
        fn prop_escaped_ids_have_no_separators(key in "[A-Za-z0-9/._-]{0,32}") {
            let escaped = escape_key(&key);
            prop_assert!(!escaped.contains('/'));
            prop_assert!(!escaped.contains('.'));
        }

        #[test]
        fn prop_unescape_inverts_escape(key in any::<String>()) {
            prop_assert_eq!(unescape_key(&escape_key(&key)), Some(key));
        }
    }
}
