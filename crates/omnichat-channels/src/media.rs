//! Attachment classification shared by the adapters.

use omnichat_core::MediaType;

/// Pick the media type for an attachment.
///
/// Priority: provider-declared type, URL file extension, MIME type.
/// A declared video whose MIME is `audio/*` is an audio note in disguise.
pub fn classify(declared: Option<&str>, url: &str, mime: Option<&str>) -> MediaType {
    let mime = mime.map(|m| m.to_ascii_lowercase());
    let mime_is = |prefix: &str| mime.as_deref().is_some_and(|m| m.starts_with(prefix));

    match declared.map(|d| d.to_ascii_lowercase()).as_deref() {
        Some("image") | Some("sticker") => return MediaType::Image,
        Some("audio") | Some("voice") | Some("ptt") => return MediaType::Audio,
        Some("video") if mime_is("audio/") => return MediaType::Audio,
        Some("video") => return MediaType::Video,
        _ => {}
    }

    let by_ext = url_extension(url).and_then(|ext| mime_guess::from_ext(&ext).first_raw());
    if let Some(guessed) = by_ext {
        if guessed.starts_with("audio/") {
            return MediaType::Audio;
        }
        if guessed.starts_with("image/") {
            return MediaType::Image;
        }
        if guessed.starts_with("video/") {
            return MediaType::Video;
        }
    }

    if mime_is("image/") {
        MediaType::Image
    } else if mime_is("audio/") {
        MediaType::Audio
    } else if mime_is("video/") {
        MediaType::Video
    } else {
        MediaType::Document
    }
}

/// Lowercase extension of the URL path, without the dot. Query strings and
/// fragments are ignored.
pub fn url_extension(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// MIME type for an attachment: the provided value if it looks like one,
/// else a guess from the URL extension.
pub fn guess_mime(url: &str, provided: Option<&str>) -> Option<String> {
    if let Some(p) = provided.filter(|p| p.contains('/')) {
        return Some(p.to_string());
    }
    let ext = url_extension(url)?;
    mime_guess::from_ext(&ext).first().map(|m| m.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_type_wins_over_extension() {
        assert_eq!(
            classify(Some("image"), "https://x.test/file.pdf", None),
            MediaType::Image
        );
        assert_eq!(
            classify(Some("sticker"), "https://x.test/s.webp", None),
            MediaType::Image
        );
    }

    #[test]
    fn video_with_audio_mime_is_audio() {
        assert_eq!(
            classify(Some("video"), "https://x.test/v.mp4", Some("audio/mp4")),
            MediaType::Audio
        );
        assert_eq!(
            classify(Some("video"), "https://x.test/v.mp4", Some("video/mp4")),
            MediaType::Video
        );
    }

    #[test]
    fn undeclared_falls_back_to_extension_then_mime() {
        assert_eq!(
            classify(Some("file"), "https://x.test/a/voice.OGG?sig=1", None),
            MediaType::Audio
        );
        assert_eq!(
            classify(None, "https://x.test/blob", Some("image/png")),
            MediaType::Image
        );
        assert_eq!(
            classify(None, "https://x.test/report.pdf", None),
            MediaType::Document
        );
        assert_eq!(classify(None, "https://x.test/blob", None), MediaType::Document);
    }

    #[test]
    fn less_common_extensions_are_recognized() {
        assert_eq!(classify(None, "https://x.test/photo.heic", None), MediaType::Image);
        assert_eq!(classify(None, "https://x.test/clip.3gp", None), MediaType::Video);
        assert!(guess_mime("https://x.test/photo.heic", None)
            .is_some_and(|m| m.starts_with("image/")));
    }

    #[test]
    fn extension_ignores_query_and_host_dots() {
        assert_eq!(
            url_extension("https://cdn.example.com/a/b.jpeg?x=1.png").as_deref(),
            Some("jpeg")
        );
        assert_eq!(url_extension("https://cdn.example.com/a/b"), None);
        assert_eq!(url_extension("/media/1/abc.ogg").as_deref(), Some("ogg"));
    }

    #[test]
    fn guess_mime_prefers_provided_value() {
        assert_eq!(
            guess_mime("https://x.test/a.jpg", Some("image/webp")).as_deref(),
            Some("image/webp")
        );
        assert_eq!(
            guess_mime("https://x.test/a.jpg", Some("image")).as_deref(),
            Some("image/jpeg")
        );
        assert_eq!(guess_mime("https://x.test/a", None), None);
    }
}
