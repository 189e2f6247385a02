use url::{Host, Url};

use crate::error::{Result, WallError};

pub const DEFAULT_RTSP_PORT: u16 = 554;
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// The pieces of an `rtsp://` or `http://` URI the engine needs to connect
/// and to write a request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// Path and query, always starting with `/`.
    pub path: String,
}

impl Target {
    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Split a URI into host, port and path.
///
/// `rtsp://cam:8554/live/ch0` → `cam`, `8554`, `/live/ch0`
/// `rtsp://user:pw@cam/live`  → `cam`, `554`, `/live` (credentials dropped)
/// `http://[fe80::1]/ptz?x=1` → `fe80::1`, `80`, `/ptz?x=1`
pub fn parse(uri: &str) -> Result<Target> {
    let invalid = || WallError::InvalidUri(uri.to_string());
    let url = Url::parse(uri).map_err(|_| invalid())?;

    let default_port = match url.scheme() {
        "rtsp" => DEFAULT_RTSP_PORT,
        "http" => DEFAULT_HTTP_PORT,
        _ => return Err(invalid()),
    };

    let host = match url.host() {
        Some(Host::Domain(name)) if !name.is_empty() => name.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        _ => return Err(invalid()),
    };

    let mut path = match url.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    Ok(Target {
        host,
        port: url.port().unwrap_or(default_port),
        path,
    })
}

/// Resolve an SDP `a=control:` value against the presentation base
/// (RFC 2326 §C.1.1).
///
/// Absolute controls are used as-is and `*` means the base itself. A
/// relative control is joined per RFC 3986; a base without a query is
/// treated as a directory, since cameras routinely send `Content-Base`
/// without the trailing `/`.
pub fn resolve_control(base: &str, control: &str) -> String {
    let control = control.trim();
    if control.is_empty() || control == "*" {
        return base.to_string();
    }

    let Ok(mut base_url) = Url::parse(base) else {
        tracing::debug!(base, control, "unparseable base, using control as-is");
        return control.to_string();
    };
    if base_url.query().is_none() && !base_url.path().ends_with('/') {
        let directory = format!("{}/", base_url.path());
        base_url.set_path(&directory);
    }

    match base_url.join(control) {
        Ok(resolved) => resolved.to_string(),
        Err(e) => {
            tracing::debug!(base, control, error = %e, "control does not resolve, using as-is");
            control.to_string()
        }
    }
}
