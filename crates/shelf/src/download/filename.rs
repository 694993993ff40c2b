use url::Url;

const DEFAULT_EXTENSION: &str = ".zip";

/// Pick the filename a delivered file is saved under.
///
/// Preference order: the name the backend generated, then `{slug(title)}-{id}{ext}`,
/// then `download-{id}{ext}`. The extension comes from the URL path.
pub fn download_filename(
    id: &str,
    title: Option<&str>,
    backend_name: Option<&str>,
    url: &Url,
) -> String {
    if let Some(name) = backend_name.map(sanitize).filter(|n| !n.trim_matches('-').is_empty()) {
        return name;
    }

    let ext = extension(url).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    let id = sanitize(id);
    match title.map(slug).filter(|s| !s.is_empty()) {
        Some(slug) => format!("{slug}-{id}{ext}"),
        None => format!("download-{id}{ext}"),
    }
}

/// Replace every character outside `[A-Za-z0-9._-]` with `-`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    if (1..=8).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(format!(".{}", ext.to_ascii_lowercase()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_backend_name_wins() {
        let name = download_filename(
            "agent-1",
            Some("Web Scraper"),
            Some("my agent (v2).zip"),
            &url("https://cdn.example.net/x.tar.gz"),
        );
        assert_eq!(name, "my-agent--v2-.zip");
    }

    #[test]
    fn test_title_slug_and_extension() {
        let name = download_filename(
            "agent-1",
            Some("  Web Scraper: Pro!  "),
            None,
            &url("https://storage.googleapis.com/b/files/bundle.TAR?sig=1"),
        );
        assert_eq!(name, "web-scraper-pro-agent-1.tar");
    }

    #[test]
    fn test_fallbacks() {
        let no_ext = url("https://storage.googleapis.com/b/files/bundle");
        assert_eq!(download_filename("agent-1", None, None, &no_ext), "download-agent-1.zip");
        assert_eq!(
            download_filename("agent-1", Some("!!!"), Some("   "), &no_ext),
            "download-agent-1.zip"
        );
    }
}
