use url::Url;

/// Host as reported in metric names, including an explicit port
pub fn url_host(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// `scheme://host/path` with userinfo, query string and fragment removed
pub fn safe_url(url: &Url) -> String {
    let host = url_host(url).unwrap_or_default();
    let path = url.path();
    // A bare authority parses with path "/"; report it without the slash
    let path = if path == "/" { "" } else { path };
    format!("{}://{}{}", url.scheme(), host, path)
}
