use url::Url;
use urlencoding::{decode, encode};

pub const ROOM_PREFIX: &str = "video_";
const PARTY_SEGMENT: &str = "party";

/// Base used to resolve bare paths such as `/watch/42`
const RELATIVE_BASE: &str = "http://localhost/";

#[derive(Debug, Clone, PartialEq)]
pub struct PartyLink {
    pub video_id: String,
    pub party_code: Option<String>,
}

/// Room shared by everyone watching the same content in simple sync mode.
pub fn room_id_for_content(content_id: &str) -> String {
    format!("{ROOM_PREFIX}{content_id}")
}

/// Content id is the last non-empty path segment of the page address.
pub fn content_id_from_url(page: &str) -> Option<String> {
    let url = parse_page(page)?;
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .and_then(|segment| decode(segment).ok())
        .map(|segment| segment.into_owned())
}

/// Party code carried in the page fragment, if any.
pub fn party_code_from_url(page: &str) -> Option<String> {
    let url = parse_page(page)?;
    url.fragment()
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .and_then(|fragment| decode(fragment).ok())
        .map(|fragment| fragment.into_owned())
}

pub fn parse_party_link(page: &str) -> Option<PartyLink> {
    let video_id = content_id_from_url(page)?;
    Some(PartyLink {
        video_id,
        party_code: party_code_from_url(page),
    })
}

/// Scheme, host and port of a page address, e.g. `https://ott.example`.
pub fn origin_of(page: &str) -> Option<String> {
    let url = Url::parse(page.trim()).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

pub fn build_party_link(origin: &str, video_id: &str, party_code: &str) -> String {
    format!(
        "{}/{PARTY_SEGMENT}/{}#{}",
        origin.trim_end_matches('/'),
        encode(video_id),
        encode(party_code)
    )
}

/// Party pages live under `/party/<videoId>`.
pub fn is_party_page(page: &str) -> bool {
    parse_page(page)
        .and_then(|url| {
            url.path_segments()
                .map(|mut segments| segments.any(|segment| segment == PARTY_SEGMENT))
        })
        .unwrap_or(false)
}

fn parse_page(page: &str) -> Option<Url> {
    let trimmed = page.trim();
    if trimmed.is_empty() {
        return None;
    }
    match Url::parse(trimmed) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(RELATIVE_BASE).ok()?.join(trimmed).ok()
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_follows_content_path() {
        let content = content_id_from_url("https://ott.example/watch/42").unwrap();
        assert_eq!(room_id_for_content(&content), "video_42");
        assert_eq!(content_id_from_url("/movies/tt0111/").as_deref(), Some("tt0111"));
        assert_eq!(content_id_from_url("https://ott.example/"), None);
        assert_eq!(content_id_from_url("   "), None);
    }

    #[test]
    fn party_link_round_trips_through_fragment() {
        let link = build_party_link("https://ott.example/", "dQw4w9WgXcQ", "x7k2q9");
        assert_eq!(link, "https://ott.example/party/dQw4w9WgXcQ#x7k2q9");
        assert_eq!(
            parse_party_link(&link),
            Some(PartyLink {
                video_id: "dQw4w9WgXcQ".into(),
                party_code: Some("x7k2q9".into()),
            })
        );
    }

    #[test]
    fn origin_drops_path_and_fragment() {
        assert_eq!(
            origin_of("https://ott.example:8443/party/42#abc").as_deref(),
            Some("https://ott.example:8443")
        );
        assert_eq!(origin_of("/party/42"), None);
    }

    #[test]
    fn missing_fragment_means_no_party_code() {
        assert_eq!(party_code_from_url("https://ott.example/party/42"), None);
        assert_eq!(party_code_from_url("https://ott.example/party/42#"), None);
    }

    #[test]
    fn party_pages_are_recognized() {
        assert!(is_party_page("https://ott.example/party/42"));
        assert!(is_party_page("/party/42#x7k2q9"));
        assert!(!is_party_page("https://ott.example/watch/42"));
        assert!(!is_party_page("https://ott.example/watch/party-time"));
    }
}
