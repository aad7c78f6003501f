//! Rate-limit and pagination headers

use chrono::DateTime;
use ghcrawl_core::QuotaInfo;
use reqwest::Url;
use reqwest::header::{HeaderMap, LINK};

const RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATELIMIT_RESET: &str = "x-ratelimit-reset";

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Quota from `x-ratelimit-*`; unknown when either header is missing or garbled
pub fn quota_from_headers(headers: &HeaderMap) -> QuotaInfo {
    let remaining = header_i64(headers, RATELIMIT_REMAINING);
    let reset_at = header_i64(headers, RATELIMIT_RESET).and_then(|ts| DateTime::from_timestamp(ts, 0));
    match (remaining, reset_at) {
        (Some(remaining), Some(reset_at)) => QuotaInfo {
            remaining,
            reset_at,
        },
        _ => QuotaInfo::unknown(),
    }
}

/// Page number of the `rel="next"` link, if any
pub fn next_page(headers: &HeaderMap) -> Option<u32> {
    let link = headers.get(LINK)?.to_str().ok()?;
    next_page_from_link(link)
}

pub fn next_page_from_link(link: &str) -> Option<u32> {
    link.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|p| {
            let p = p.trim();
            p == r#"rel="next""# || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        let url = Url::parse(target.strip_prefix('<')?.strip_suffix('>')?).ok()?;
        let (_, page) = url.query_pairs().find(|(key, _)| key == "page")?;
        page.parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn next_link_among_several() {
        let link = r#"<https://api.github.com/organizations/9/public_members?per_page=100&page=3>; rel="next", <https://api.github.com/organizations/9/public_members?per_page=100&page=7>; rel="last""#;
        assert_eq!(next_page_from_link(link), Some(3));
    }

    #[test]
    fn last_page_has_no_next() {
        let link = r#"<https://api.github.com/orgs/o/public_members?page=1>; rel="prev", <https://api.github.com/orgs/o/public_members?page=1>; rel="first""#;
        assert_eq!(next_page_from_link(link), None);
    }

    #[test]
    fn garbage_link_ignored() {
        assert_eq!(next_page_from_link("nonsense"), None);
        assert_eq!(next_page_from_link(r#"<not a url>; rel="next""#), None);
    }

    #[test]
    fn quota_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(RATELIMIT_REMAINING, HeaderValue::from_static("4321"));
        headers.insert(RATELIMIT_RESET, HeaderValue::from_static("1700000000"));
        let quota = quota_from_headers(&headers);
        assert_eq!(quota.remaining, 4321);
        assert_eq!(quota.reset_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn partial_quota_is_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert(RATELIMIT_REMAINING, HeaderValue::from_static("12"));
        assert_eq!(quota_from_headers(&headers), QuotaInfo::unknown());
    }
}
