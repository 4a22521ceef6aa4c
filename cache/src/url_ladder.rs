//! URL repair transforms for remote image addresses.
//!
//! Stored URLs come from several clients and are not consistently encoded.
//! Each transform is a pure `&str -> String` function; the fallback loader
//! tries them in [`LADDER`] order.

pub struct UrlTransform {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

pub const LADDER: [UrlTransform; 4] = [
    UrlTransform { name: "normalized", apply: normalize_url },
    UrlTransform { name: "raw", apply: raw_url },
    UrlTransform { name: "encoded", apply: fully_encode },
    UrlTransform { name: "no-query", apply: strip_query },
];

/// Characters `encodeURI` leaves alone.
const URI_SAFE: &[u8] = b";,/?:@&=+$-_.!~*'()#";

fn raw_url(url: &str) -> String {
    url.to_string()
}

/// Split into (scheme+authority, path, query+fragment).
fn split_url(url: &str) -> (&str, &str, &str) {
    let path_start = match url.find("://") {
        Some(i) => url[i + 3..].find('/').map(|p| i + 3 + p).unwrap_or(url.len()),
        None => 0,
    };
    let tail_start = url[path_start..]
        .find(['?', '#'])
        .map(|p| path_start + p)
        .unwrap_or(url.len());
    (&url[..path_start], &url[path_start..tail_start], &url[tail_start..])
}

/// Decode then re-encode every path segment independently, so both raw
/// spaces and existing `%20`s end up encoded exactly once.
pub fn normalize_url(url: &str) -> String {
    let (head, path, tail) = split_url(url);
    let segments: Vec<String> = path
        .split('/')
        .map(|segment| {
            let decoded = urlencoding::decode(segment)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| segment.to_string());
            urlencoding::encode(&decoded).into_owned()
        })
        .collect();
    format!("{}{}{}", head, segments.join("/"), tail)
}

/// Percent-encode everything `encodeURI` would, including literal `%`.
pub fn fully_encode(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    for b in url.bytes() {
        if b.is_ascii_alphanumeric() || URI_SAFE.contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

pub fn strip_query(url: &str) -> String {
    url.split(['?', '#']).next().unwrap_or(url).to_string()
}

/// All distinct ladder variants of `url`, in escalation order.
pub fn url_variants(url: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(LADDER.len());
    for step in LADDER.iter() {
        let candidate = (step.apply)(url);
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}
