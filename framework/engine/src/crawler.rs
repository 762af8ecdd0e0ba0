use std::collections::HashSet;
use std::time::Duration;

use url::Url;

use siteload_core::protocol;

/// User agent sent with every crawl request.
pub const CRAWLER_USER_AGENT: &str = "Mozilla/5.0 (compatible; SiteloadCrawler/1.0)";

/// Extensions that never lead to an HTML page worth load-testing.
const IGNORED_EXTENSIONS: [&str; 18] = [
    ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".pdf", ".zip", ".mp4", ".mp3", ".css",
    ".js", ".ico", ".woff", ".woff2", ".ttf", ".xml", ".json",
];

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Number of link hops followed from the base page.
    pub max_depth: usize,
    /// Hard cap on discovered paths; the crawl stops growing once reached.
    pub max_urls: usize,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_urls: 30,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Discovers same-domain pages starting from a base URL, with no prior
/// knowledge of the site.
///
/// The traversal is depth-first: an early deep branch can consume the URL cap
/// before shallow siblings are reached. That trade-off is intentional and
/// callers should not rely on any particular coverage shape.
pub struct Crawler {
    base: Url,
    options: CrawlOptions,
    client: reqwest::blocking::Client,
    visited: HashSet<String>,
    found: Vec<String>,
}

impl Crawler {
    pub fn new(base_url: &str, options: CrawlOptions) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)?;
        let client = reqwest::blocking::Client::builder()
            .user_agent(CRAWLER_USER_AGENT)
            .timeout(options.timeout)
            .build()?;

        Ok(Self {
            base,
            options,
            client,
            visited: HashSet::new(),
            found: Vec::new(),
        })
    }

    /// Run the crawl and return the discovered relative paths.
    ///
    /// Never fails: every per-URL error abandons only that branch. The result
    /// always contains the root path and never exceeds the configured cap.
    /// Each discovered path is printed as a side-channel line for the
    /// supervising process.
    pub fn crawl(&mut self) -> Vec<String> {
        println!("\n{}", "-".repeat(55));
        println!("  [CRAWL] Analyse de : {}", self.base);
        println!(
            "  Profondeur : {} | Max URLs : {}",
            self.options.max_depth, self.options.max_urls
        );
        println!("{}", "-".repeat(55));

        let base = self.base.clone();
        self.visit(base, 0);

        ensure_root(&mut self.found, self.options.max_urls);

        println!("\n  {} URL(s) decouvertes :\n", self.found.len());
        for path in &self.found {
            println!("{}", protocol::discovered_line(path));
        }
        println!("{}\n", "-".repeat(55));

        self.found.clone()
    }

    fn visit(&mut self, url: Url, depth: usize) {
        if depth > self.options.max_depth
            || self.found.len() >= self.options.max_urls
            || self.visited.contains(url.as_str())
        {
            return;
        }
        self.visited.insert(url.to_string());

        let response = match self.client.get(url.clone()).send() {
            Ok(response) => response,
            Err(err) if is_tls_error(&err) && url.scheme() == "https" => {
                log::warn!("TLS failure on {url}, retrying over plain http");
                let mut downgraded = url.clone();
                if downgraded.set_scheme("http").is_err() {
                    return;
                }
                self.visit(downgraded, depth);
                return;
            }
            Err(err) if err.is_timeout() => {
                log::warn!("Timeout on {url}");
                return;
            }
            Err(err) => {
                log::warn!("Request failed for {url}: {err}");
                return;
            }
        };

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !content_type.contains("text/html") {
            return;
        }

        // The path of the final URL, after any redirects.
        let final_url = response.url().clone();
        let path = match final_url.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        if !self.found.contains(&path) {
            self.found.push(path);
        }

        let body = match response.text() {
            Ok(body) => body,
            Err(err) => {
                log::warn!("Could not read body of {final_url}: {err}");
                return;
            }
        };

        for link in extract_links(&body, &final_url, &self.base, &self.visited) {
            if self.found.len() >= self.options.max_urls {
                break;
            }
            self.visit(link, depth + 1);
        }
    }
}

/// Extract same-domain anchor targets from an HTML page.
///
/// The pages under test only need `<a href>` scanning, so this walks anchor
/// tags directly instead of building a DOM. Fragments, `mailto:`, `tel:` and
/// `javascript:` links, cross-domain links and known binary extensions are
/// skipped, and anything already visited is not returned again.
pub fn extract_links(html: &str, page_url: &Url, base: &Url, visited: &HashSet<String>) -> Vec<Url> {
    let mut links = Vec::new();

    for href in anchor_hrefs(html) {
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("javascript:")
        {
            continue;
        }

        let mut resolved = match page_url.join(href) {
            Ok(resolved) => resolved,
            Err(_) => continue,
        };
        resolved.set_fragment(None);

        if !same_site(&resolved, base) {
            continue;
        }

        let path = resolved.path().to_ascii_lowercase();
        if IGNORED_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            continue;
        }

        if !visited.contains(resolved.as_str()) {
            links.push(resolved);
        }
    }

    links
}

/// The root path is always part of the result, even when unreachable, and
/// adding it never pushes the list past the cap.
fn ensure_root(found: &mut Vec<String>, max_urls: usize) {
    if found.iter().any(|path| path == "/") {
        return;
    }
    if found.len() >= max_urls.max(1) {
        found.pop();
    }
    found.insert(0, "/".to_string());
}

fn same_site(url: &Url, base: &Url) -> bool {
    url.host_str() == base.host_str() && url.port_or_known_default() == base.port_or_known_default()
}

/// Yield the value of every `href` attribute found inside an `<a ...>` tag.
fn anchor_hrefs(html: &str) -> Vec<&str> {
    let mut hrefs = Vec::new();
    let lower = html.to_ascii_lowercase();
    let mut cursor = 0;

    while let Some(offset) = lower[cursor..].find("<a") {
        let tag_start = cursor + offset;
        let after = &lower[tag_start + 2..];
        // "<a" must be a tag, not the start of "<abbr" or similar.
        if !after.starts_with(|c: char| c.is_ascii_whitespace()) {
            cursor = tag_start + 2;
            continue;
        }
        let Some(tag_len) = lower[tag_start..].find('>') else {
            break;
        };
        let tag_end = tag_start + tag_len;

        if let Some(href_offset) = lower[tag_start..tag_end].find("href") {
            let mut rest = html[tag_start + href_offset + 4..tag_end].trim_start();
            if let Some(stripped) = rest.strip_prefix('=') {
                rest = stripped.trim_start();
                let value = match rest.chars().next() {
                    Some(quote @ ('"' | '\'')) => {
                        rest[1..].split(quote).next().unwrap_or_default()
                    }
                    Some(_) => rest.split_ascii_whitespace().next().unwrap_or_default(),
                    None => "",
                };
                hrefs.push(value);
            }
        }

        cursor = tag_end + 1;
    }

    hrefs
}

/// reqwest has no dedicated TLS error kind, so match on the rendered chain.
fn is_tls_error(err: &reqwest::Error) -> bool {
    let rendered = format!("{err:?}").to_ascii_lowercase();
    rendered.contains("tls") || rendered.contains("ssl") || rendered.contains("certificate")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn extracts_same_domain_links_only() {
        let html = r#"
            <a href="/about">About</a>
            <a href="https://example.com/shop">Shop</a>
            <a href="https://elsewhere.org/away">Away</a>
        "#;
        let base = url("https://example.com/");
        let links = extract_links(html, &base, &base, &HashSet::new());
        assert_eq!(
            links,
            vec![
                url("https://example.com/about"),
                url("https://example.com/shop")
            ]
        );
    }

    #[test]
    fn skips_non_navigation_schemes_and_fragments() {
        let html = r##"
            <a href="#top">Top</a>
            <a href="mailto:a@b.c">Mail</a>
            <a href="tel:+3312345678">Call</a>
            <a href="javascript:void(0)">JS</a>
            <a href="/contact#form">Contact</a>
            <a href="">Empty</a>
        "##;
        let base = url("https://example.com/");
        let links = extract_links(html, &base, &base, &HashSet::new());
        assert_eq!(links, vec![url("https://example.com/contact")]);
    }

    #[test]
    fn skips_asset_extensions() {
        let html = r#"
            <a href="/logo.png">Logo</a>
            <a href="/doc.PDF">Doc</a>
            <a href="/feed.xml">Feed</a>
            <a href="/pages">Pages</a>
        "#;
        let base = url("https://example.com/");
        let links = extract_links(html, &base, &base, &HashSet::new());
        assert_eq!(links, vec![url("https://example.com/pages")]);
    }

    #[test]
    fn resolves_relative_links_against_the_page_url() {
        let html = r#"<a href="details">Details</a>"#;
        let base = url("https://example.com/");
        let page = url("https://example.com/products/");
        let links = extract_links(html, &page, &base, &HashSet::new());
        assert_eq!(links, vec![url("https://example.com/products/details")]);
    }

    #[test]
    fn already_visited_links_are_not_returned() {
        let html = r#"<a href="/about">About</a><a href="/team">Team</a>"#;
        let base = url("https://example.com/");
        let mut visited = HashSet::new();
        visited.insert("https://example.com/about".to_string());
        let links = extract_links(html, &base, &base, &visited);
        assert_eq!(links, vec![url("https://example.com/team")]);
    }

    #[test]
    fn ports_distinguish_sites() {
        let html = r#"<a href="https://example.com:8443/admin">Admin</a>"#;
        let base = url("https://example.com/");
        let links = extract_links(html, &base, &base, &HashSet::new());
        assert!(links.is_empty());
    }

    #[test]
    fn single_quoted_and_unquoted_hrefs_are_read() {
        let html = "<a href='/a'>A</a> <a href=/b>B</a>";
        let base = url("https://example.com/");
        let links = extract_links(html, &base, &base, &HashSet::new());
        assert_eq!(
            links,
            vec![url("https://example.com/a"), url("https://example.com/b")]
        );
    }

    #[test]
    fn root_is_added_when_missing() {
        let mut found = vec!["/about".to_string(), "/contact".to_string()];
        ensure_root(&mut found, 30);
        assert_eq!(found, vec!["/", "/about", "/contact"]);
    }

    #[test]
    fn root_never_pushes_the_list_past_the_cap() {
        let mut found: Vec<String> = (0..5).map(|n| format!("/page-{n}")).collect();
        ensure_root(&mut found, 5);
        assert_eq!(found.len(), 5);
        assert_eq!(found[0], "/");
        assert!(!found.contains(&"/page-4".to_string()));
    }

    #[test]
    fn an_empty_crawl_still_yields_the_root() {
        let mut found = Vec::new();
        ensure_root(&mut found, 30);
        assert_eq!(found, vec!["/"]);
    }

    #[test]
    fn root_already_present_is_left_alone() {
        let mut found = vec!["/about".to_string(), "/".to_string()];
        ensure_root(&mut found, 30);
        assert_eq!(found, vec!["/about", "/"]);
    }
}
