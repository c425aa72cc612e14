use http::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;

/// Connection-scoped headers that must not cross the proxy
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Convert HTTP headers to the envelope multimap
/// Values that are not valid UTF-8 become empty strings
pub fn headers_to_map(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();

    for (name, value) in headers.iter() {
        let key = name.as_str().to_string();
        let val = value.to_str().unwrap_or("").to_string();

        map.entry(key).or_default().push(val);
    }

    map
}

/// Convert the envelope multimap to an HTTP HeaderMap
/// Invalid names or values are skipped
pub fn map_to_headers(map: &HashMap<String, Vec<String>>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, values) in map.iter() {
        if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
            for value in values {
                if let Ok(header_value) = HeaderValue::from_str(value) {
                    headers.append(header_name.clone(), header_value);
                }
            }
        }
    }

    headers
}

/// Remove hop-by-hop headers from a multimap, matching names case-insensitively
pub fn strip_hop_by_hop(map: &mut HashMap<String, Vec<String>>) {
    map.retain(|name, _| {
        !HOP_BY_HOP_HEADERS
            .iter()
            .any(|hop| name.eq_ignore_ascii_case(hop))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_to_map_multiple_values() {
        let mut headers = HeaderMap::new();
        headers.insert("set-cookie", "session=abc".parse().unwrap());
        headers.append("set-cookie", "token=xyz".parse().unwrap());
        headers.insert("content-type", "text/plain".parse().unwrap());

        let map = headers_to_map(&headers);
        assert_eq!(map.len(), 2);

        let cookies = map.get("set-cookie").unwrap();
        assert_eq!(cookies, &vec!["session=abc", "token=xyz"]);
    }

    #[test]
    fn test_map_to_headers_multiple_values() {
        let mut map = HashMap::new();
        map.insert(
            "set-cookie".to_string(),
            vec!["session=abc".to_string(), "token=xyz".to_string()],
        );

        let headers = map_to_headers(&map);
        let cookies: Vec<_> = headers
            .get_all("set-cookie")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();

        assert_eq!(cookies, vec!["session=abc", "token=xyz"]);
    }

    #[test]
    fn test_map_to_headers_skips_invalid() {
        let mut map = HashMap::new();
        map.insert("valid-header".to_string(), vec!["value".to_string()]);
        map.insert("invalid header".to_string(), vec!["value".to_string()]);
        map.insert("x-bad-value".to_string(), vec!["line\nbreak".to_string()]);

        let headers = map_to_headers(&map);
        assert_eq!(headers.len(), 1);
        assert!(headers.get("valid-header").is_some());
    }

    #[test]
    fn test_headers_to_map_non_utf8_handling() {
        let mut headers = HeaderMap::new();
        headers.insert("x-binary-header", HeaderValue::from_bytes(&[0xFF, 0xFE]).unwrap());

        let map = headers_to_map(&headers);
        assert_eq!(map.get("x-binary-header").unwrap(), &vec![""]);
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut map = HashMap::new();
        map.insert("Connection".to_string(), vec!["keep-alive".to_string()]);
        map.insert("Proxy-Connection".to_string(), vec!["keep-alive".to_string()]);
        map.insert("transfer-encoding".to_string(), vec!["chunked".to_string()]);
        map.insert("Content-Type".to_string(), vec!["text/html".to_string()]);
        map.insert("x-request-id".to_string(), vec!["abc".to_string()]);

        strip_hop_by_hop(&mut map);

        assert_eq!(map.len(), 2);
        assert!(map.contains_key("Content-Type"));
        assert!(map.contains_key("x-request-id"));
    }
}
