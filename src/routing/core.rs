use url::Url;

use crate::error::{ApplicationError, Result};

/// Server mount prefix plus the optional workspace-scoped client prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasePath {
    base_path: String,
    client_base_path: String,
}

impl BasePath {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self::with_client_base_path(base_path, "")
    }

    pub fn with_client_base_path(
        base_path: impl Into<String>,
        client_base_path: impl Into<String>,
    ) -> Self {
        Self {
            base_path: strip_trailing_slash(base_path.into()),
            client_base_path: strip_trailing_slash(client_base_path.into()),
        }
    }

    /// Full prefix: server base path followed by the client base path.
    pub fn get(&self) -> String {
        format!("{}{}", self.base_path, self.client_base_path)
    }

    pub fn server_base_path(&self) -> &str {
        &self.base_path
    }

    pub fn client_base_path(&self) -> &str {
        &self.client_base_path
    }

    fn prefix(&self, without_client_base_path: bool) -> String {
        if without_client_base_path {
            self.base_path.clone()
        } else {
            self.get()
        }
    }

    /// Prefix a root-relative path. Absolute URLs and relative paths pass through.
    pub fn prepend(&self, path: &str, without_client_base_path: bool) -> String {
        let prefix = self.prefix(without_client_base_path);
        if prefix.is_empty() || has_scheme(path) || !path.starts_with('/') {
            return path.to_string();
        }
        format!("{prefix}{path}")
    }

    pub fn remove(&self, path: &str, without_client_base_path: bool) -> String {
        let prefix = self.prefix(without_client_base_path);
        if prefix.is_empty() {
            return path.to_string();
        }
        if path == prefix {
            return "/".to_string();
        }
        match path.strip_prefix(prefix.as_str()) {
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => path.to_string(),
        }
    }
}

fn strip_trailing_slash(mut value: String) -> String {
    while value.ends_with('/') {
        value.pop();
    }
    value
}

fn has_scheme(path: &str) -> bool {
    path.contains("://") || path.starts_with("//")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveSlashes {
    pub trailing: bool,
    pub leading: bool,
    pub duplicates: bool,
}

pub fn remove_slashes(url: &str, options: RemoveSlashes) -> String {
    let mut out = if options.duplicates {
        let mut collapsed = String::with_capacity(url.len());
        let mut previous_slash = false;
        for ch in url.chars() {
            if ch == '/' && previous_slash {
                continue;
            }
            previous_slash = ch == '/';
            collapsed.push(ch);
        }
        collapsed
    } else {
        url.to_string()
    };
    if options.trailing && out.ends_with('/') {
        out.pop();
    }
    if options.leading && out.starts_with('/') {
        out.remove(0);
    }
    out
}

/// Join an application route with a sub-path.
///
/// Slashes are normalized before any `#` fragment; the fragment itself is kept
/// verbatim, including a trailing slash.
pub fn append_app_path(app_base_path: &str, path: Option<&str>) -> String {
    let path = path.unwrap_or("");
    let (pathname, fragment) = match path.find('#') {
        Some(index) => path.split_at(index),
        None => (path, ""),
    };

    let mut joined = String::from(app_base_path);
    if !pathname.is_empty() {
        if !pathname.starts_with('?') {
            joined.push('/');
        }
        joined.push_str(pathname);
    }

    let mut normalized = remove_slashes(
        &joined,
        RemoveSlashes {
            duplicates: true,
            ..RemoveSlashes::default()
        },
    );
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized.push_str(fragment);
    normalized
}

/// Resolve a root-relative URL against an origin such as `http://localhost`.
pub fn relative_to_absolute(origin: &str, relative: &str) -> Result<String> {
    let invalid = |reason: String| ApplicationError::InvalidUrl {
        url: relative.to_string(),
        reason,
    };
    let base = Url::parse(origin).map_err(|err| invalid(err.to_string()))?;
    let absolute = base.join(relative).map_err(|err| invalid(err.to_string()))?;
    Ok(absolute.to_string())
}

/// Internal application target extracted from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAppUrl {
    pub app: String,
    pub path: Option<String>,
}

/// Decides whether a URL points at a registered application.
pub trait AppUrlParser: Send + Sync {
    /// `routes` lists `(app id, route)` pairs in registration order.
    fn parse(&self, url: &str, routes: &[(String, String)]) -> Option<ParsedAppUrl>;
}

/// Default parser matching URLs against the registered route table.
#[derive(Debug, Clone)]
pub struct RouteTableParser {
    base_path: BasePath,
    origin: String,
}

impl RouteTableParser {
    pub fn new(base_path: BasePath, origin: impl Into<String>) -> Self {
        Self {
            base_path,
            origin: origin.into(),
        }
    }
}

impl AppUrlParser for RouteTableParser {
    fn parse(&self, url: &str, routes: &[(String, String)]) -> Option<ParsedAppUrl> {
        parse_app_url(url, &self.base_path, &self.origin, routes)
    }
}

pub fn parse_app_url(
    url: &str,
    base_path: &BasePath,
    origin: &str,
    routes: &[(String, String)],
) -> Option<ParsedAppUrl> {
    let origin = origin.trim_end_matches('/');
    let url = if !origin.is_empty() {
        url.strip_prefix(origin).unwrap_or(url)
    } else {
        url
    };
    if has_scheme(url) {
        return None;
    }
    let url = base_path.remove(url, false);
    if !url.starts_with('/') {
        return None;
    }

    routes.iter().find_map(|(id, route)| {
        let rest = url.strip_prefix(route.as_str())?;
        let on_boundary = rest.is_empty()
            || rest.starts_with('/')
            || rest.starts_with('#')
            || rest.starts_with('?');
        on_boundary.then(|| ParsedAppUrl {
            app: id.clone(),
            path: (!rest.is_empty()).then(|| rest.to_string()),
        })
    })
}
