use anyhow::anyhow;
use std::net::SocketAddr;
use url::Url;

/// Validate a node-supplied base URL and normalize it to
/// `scheme://host[:port]`. Nodes advertise a bare origin that the registry
/// hands to readers, so anything beyond that (credentials, path, query,
/// fragment) is rejected rather than silently dropped. The control-character
/// check runs before parsing because the URL parser strips tabs and newlines
/// instead of failing on them.
pub fn sanitize_url(raw: &str) -> anyhow::Result<String> {
    let raw = raw.trim();
    if raw.bytes().any(|b| b.is_ascii_control()) {
        return Err(anyhow!("URL contains control characters"));
    }

    let parsed = Url::parse(raw).map_err(|e| anyhow!("invalid URL: {}", e))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(anyhow!("unsupported URL scheme: {}", parsed.scheme()));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(anyhow!("URL must not carry credentials"));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(anyhow!("URL must not carry a query or fragment"));
    }
    if !matches!(parsed.path(), "" | "/") {
        return Err(anyhow!("URL must be a bare origin, got path {:?}", parsed.path()));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("URL is missing a host"))?;

    // `port()` is None when the port is the scheme default, which is exactly
    // the normalization we want.
    Ok(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}

/// Parse a listen address. Accepts "host:port", ":port" (all interfaces),
/// or a full http(s) URL.
pub fn parse_socket_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    let addr = addr.trim();

    if let Some(port) = addr.strip_prefix(':') {
        return Ok(format!("0.0.0.0:{}", port).parse()?);
    }

    let url = if addr.starts_with("http://") || addr.starts_with("https://") {
        Url::parse(addr)?
    } else {
        Url::parse(&format!("http://{}", addr))?
    };

    let host = url.host_str().ok_or(anyhow!("missing host in address"))?;
    let port = url.port().unwrap_or(80);

    Ok(format!("{}:{}", host, port).parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_trailing_slash() {
        assert_eq!(
            sanitize_url("http://localhost:9001/").unwrap(),
            "http://localhost:9001"
        );
    }

    #[test]
    fn sanitize_rejects_bad_schemes() {
        assert!(sanitize_url("ftp://host").is_err());
        assert!(sanitize_url("").is_err());
        assert!(sanitize_url("http://host\nx").is_err());
    }

    #[test]
    fn sanitize_rejects_non_origin_urls() {
        assert!(sanitize_url("http://user:pw@host:9001").is_err());
        assert!(sanitize_url("http://host:9001/some/path").is_err());
        assert!(sanitize_url("http://host:9001?x=1").is_err());
        assert!(sanitize_url("http://host:9001#frag").is_err());
    }

    #[test]
    fn sanitize_drops_default_ports() {
        assert_eq!(sanitize_url("http://host:80").unwrap(), "http://host");
        assert_eq!(
            sanitize_url("https://host:8443").unwrap(),
            "https://host:8443"
        );
    }

    #[test]
    fn parse_bare_port() {
        let addr = parse_socket_addr(":8080").unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn parse_host_port() {
        let addr = parse_socket_addr("127.0.0.1:8000").unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:8000");
    }
}
