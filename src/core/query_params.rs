use spin_sdk::http::Request;

/// First non-empty value of `key` in the request's query string, URL-decoded.
///
/// A key given without `=` counts as empty.
pub fn query_param(req: &Request, key: &str) -> Option<String> {
    let uri = req.uri().to_string();
    let (_, query) = uri.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(k, v)| *k == key && !v.is_empty())
        .map(|(_, v)| {
            let v = v.replace('+', " ");
            urlencoding::decode(&v).map(|s| s.into_owned()).unwrap_or(v)
        })
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin_sdk::http::Method;

    fn get(uri: &str) -> Request {
        Request::builder().method(Method::Get).uri(uri).body(Vec::new()).build()
    }

    #[test]
    fn decodes_the_named_value() {
        let req = get("/api/users?currentUserId=abc%2D1&flag&q=two+words");
        assert_eq!(query_param(&req, "currentUserId").as_deref(), Some("abc-1"));
        assert_eq!(query_param(&req, "q").as_deref(), Some("two words"));
        assert_eq!(query_param(&req, "flag"), None);
        assert_eq!(query_param(&req, "missing"), None);
    }

    #[test]
    fn empty_values_are_skipped() {
        let req = get("/api/posts/timeline/all?userId=&userId=u2");
        assert_eq!(query_param(&req, "userId").as_deref(), Some("u2"));
    }

    #[test]
    fn no_query() {
        assert_eq!(query_param(&get("/api/users"), "currentUserId"), None);
    }
}
