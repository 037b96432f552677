//! Accept header parsing and preference resolution.

use http::HeaderMap;
use http::header::ACCEPT;
use mediatype::MediaType;
use mediatype::MediaTypeList;
use mediatype::ReadParams;
use mediatype::names::APPLICATION;
use mediatype::names::HTML;
use mediatype::names::JSON;
use mediatype::names::TEXT;
use mediatype::names::_STAR;

const DEFAULT_QUALITY: f32 = 1.0;

/// A media range from the Accept header together with its quality weight.
struct RankedMediaType<'a> {
    media_type: MediaType<'a>,
    quality: f32,
}

fn quality(media_type: &MediaType) -> f32 {
    let Some(name) = mediatype::Name::new("q") else {
        return DEFAULT_QUALITY;
    };
    media_type
        .get_param(name)
        .and_then(|value| value.unquoted_str().parse::<f32>().ok())
        .unwrap_or(DEFAULT_QUALITY)
}

fn range_includes(range: &MediaType, candidate: &MediaType) -> bool {
    (range.ty == _STAR || range.ty == candidate.ty)
        && (range.subty == _STAR || range.subty == candidate.subty)
}

/// Resolve the client's preferred representation among `candidates`.
///
/// The Accept header values are ranked by quality, ties keeping header
/// order. Each ranked range is then tested against the candidates in the
/// order they are given, so earlier candidates win wildcards and ranges
/// that include several of them. Returns `None` when nothing matches.
fn preferred<'a>(headers: &HeaderMap, candidates: &[MediaType<'a>]) -> Option<MediaType<'a>> {
    let mut ranked: Vec<RankedMediaType> = headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(MediaTypeList::new)
        .filter_map(|media_type| media_type.ok())
        .map(|media_type| RankedMediaType {
            quality: quality(&media_type),
            media_type,
        })
        .collect();
    // sort_by is stable: equal qualities keep their header order
    ranked.sort_by(|a, b| b.quality.total_cmp(&a.quality));

    for entry in &ranked {
        for candidate in candidates {
            if range_includes(&entry.media_type, candidate) {
                return Some(candidate.clone());
            }
        }
    }
    None
}

/// Whether a GET request should be answered with the explorer page.
///
/// `text/html` must outrank `application/json` outright: a wildcard or a
/// tie resolves to JSON and the request is executed as a query instead.
pub(crate) fn prefers_html(headers: &HeaderMap) -> bool {
    let json = MediaType::new(APPLICATION, JSON);
    let html = MediaType::new(TEXT, HTML);

    preferred(headers, &[json, html.clone()]) == Some(html)
}
