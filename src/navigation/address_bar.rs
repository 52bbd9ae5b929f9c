//! Host address-bar contract.
//!
//! The visible URL carries the embedded route in a `subpage` query parameter.
//! A missing `subpage` means `/`. One-time parameters (`token`, `returnUrl`,
//! `tunnelUrl`) never survive in a bookmarkable URL, and the fragment is
//! always cleared because it lives inside `subpage`.

use reqwest::Url;

pub const SUBPAGE_PARAM: &str = "subpage";
pub const TOKEN_PARAM: &str = "token";
pub const RETURN_URL_PARAM: &str = "returnUrl";
pub const TUNNEL_URL_PARAM: &str = "tunnelUrl";

const ONE_TIME_PARAMS: [&str; 3] = [TOKEN_PARAM, RETURN_URL_PARAM, TUNNEL_URL_PARAM];

/// Path, query and fragment of a parsed URL.
pub fn path_of(url: &Url) -> String {
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        path.push('#');
        path.push_str(fragment);
    }
    path
}

/// Value of query parameter `name` in `href`.
pub fn query_param(href: &str, name: &str) -> Option<String> {
    let url = Url::parse(href).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Route currently shown in the address bar.
pub fn subpage(href: &str) -> String {
    query_param(href, SUBPAGE_PARAM)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "/".to_string())
}

fn rewrite_query(url: &mut Url, drop: &[&str], subpage: &str) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != SUBPAGE_PARAM && !drop.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.set_query(None);
    if kept.is_empty() && subpage == "/" {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (k, v) in &kept {
        pairs.append_pair(k, v);
    }
    if subpage != "/" {
        pairs.append_pair(SUBPAGE_PARAM, subpage);
    }
}

/// `href` with `subpage` set to `path` (removed for `/`) and no fragment.
/// Unparseable input is returned unchanged.
pub fn with_subpage(href: &str, path: &str) -> String {
    let Ok(mut url) = Url::parse(href) else {
        return href.to_string();
    };
    rewrite_query(&mut url, &[], path);
    url.set_fragment(None);
    url.to_string()
}

/// Bookmark-safe form of `href`: one-time parameters stripped, `subpage` set.
pub fn clean_for_bookmark(href: &str, path: &str) -> String {
    let Ok(mut url) = Url::parse(href) else {
        return href.to_string();
    };
    rewrite_query(&mut url, &ONE_TIME_PARAMS, path);
    url.set_fragment(None);
    url.to_string()
}

/// URL the embedded container should load for `path` on `base`.
pub fn frame_target(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Sign-in hand-off URL: `<base>/auth/signin-token?token=..&returnUrl=..`.
pub fn signin_target(base: &str, token: &str, return_path: &str) -> Option<String> {
    let mut url = Url::parse(&format!("{}/auth/signin-token", base.trim_end_matches('/'))).ok()?;
    url.query_pairs_mut()
        .append_pair(TOKEN_PARAM, token)
        .append_pair(RETURN_URL_PARAM, return_path);
    Some(url.to_string())
}

/// Route encoded in an embedded-session URL.
///
/// Absolute URLs yield their path, query and fragment; anything under `base`
/// yields the remainder; bare paths are kept; everything else is `/`.
pub fn extract_path(url: &str, base: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Url::parse(url).map_or_else(|_| "/".to_string(), |u| path_of(&u));
    }
    if !base.is_empty() {
        if let Some(rest) = url.strip_prefix(base) {
            return if rest.is_empty() {
                "/".to_string()
            } else {
                rest.to_string()
            };
        }
    }
    if url.starts_with('/') {
        url.to_string()
    } else {
        "/".to_string()
    }
}

/// `scheme://host[:port]` of `url`.
pub fn origin_of(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Page URL without query or fragment.
pub fn page_url(href: &str) -> Option<String> {
    let mut url = Url::parse(href).ok()?;
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

/// Directory the page lives in, without a trailing slash.
pub fn page_base(href: &str) -> Option<String> {
    let page = page_url(href)?;
    let cut = page.rfind('/')?;
    Some(page[..cut].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://portal.example/app/portal.html";

    #[test]
    fn subpage_round_trip() {
        let href = with_subpage(PAGE, "/a/b?x=1");
        assert_eq!(subpage(&href), "/a/b?x=1");
    }

    #[test]
    fn root_path_removes_parameter() {
        let href = with_subpage(&format!("{PAGE}?subpage=%2Fold&lang=en#frag"), "/");
        assert_eq!(href, format!("{PAGE}?lang=en"));
        assert_eq!(subpage(&href), "/");
        assert_eq!(with_subpage(PAGE, "/"), PAGE);
    }

    #[test]
    fn bookmark_strips_one_time_parameters() {
        let href = format!(
            "{PAGE}?token=secret&returnUrl=%2Fx&tunnelUrl=https%3A%2F%2Fold.example&lang=en#h"
        );
        let clean = clean_for_bookmark(&href, "/x");
        assert!(!clean.contains("secret"));
        assert!(!clean.contains("tunnelUrl"));
        assert!(!clean.contains("returnUrl"));
        assert!(!clean.contains('#'));
        assert_eq!(query_param(&clean, "lang").as_deref(), Some("en"));
        assert_eq!(subpage(&clean), "/x");
    }

    #[test]
    fn extract_path_variants() {
        let base = "https://t.example";
        assert_eq!(extract_path("https://t.example/a?b=1#c", base), "/a?b=1#c");
        assert_eq!(extract_path("https://t.example", base), "/");
        assert_eq!(extract_path("/plain", base), "/plain");
        assert_eq!(extract_path("relative", base), "/");
        assert_eq!(extract_path("https://other.example/z", base), "/z");
    }

    #[test]
    fn signin_target_carries_return_path() {
        let url = signin_target("https://t.example/", "abc", "/games?id=2").unwrap();
        assert!(url.starts_with("https://t.example/auth/signin-token?"));
        assert_eq!(query_param(&url, "token").as_deref(), Some("abc"));
        assert_eq!(query_param(&url, "returnUrl").as_deref(), Some("/games?id=2"));
    }

    #[test]
    fn origins_and_bases() {
        assert_eq!(
            origin_of("https://t.example:8443/x?y").as_deref(),
            Some("https://t.example:8443")
        );
        assert_eq!(origin_of("not a url"), None);
        assert_eq!(
            page_base(&format!("{PAGE}?q=1")).as_deref(),
            Some("https://portal.example/app")
        );
        assert_eq!(page_url(&format!("{PAGE}?q=1#f")).as_deref(), Some(PAGE));
    }

    #[test]
    fn frame_target_joins() {
        assert_eq!(frame_target("https://t.example/", "/a"), "https://t.example/a");
        assert_eq!(frame_target("https://t.example", "a"), "https://t.example/a");
    }
}
