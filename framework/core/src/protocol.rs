//! The stdout side channel between the load engine and its supervisor.
//!
//! The engine has no channel back to the parent other than its own output, so
//! two line conventions carry structured information through the log stream:
//!
//! - A line whose trimmed form starts with `- /` or `- http` carries one
//!   discovered URL (the crawler prints one such line per result).
//! - A line containing one of [`CRAWL_DONE_MARKERS`] signals that the crawl
//!   has finished and the load phase is starting.
//!
//! Both processes use this module, so the emitting and the scraping side
//! cannot drift apart. The phrases themselves are load-bearing; changing one
//! breaks every supervisor watching an older engine.

/// Marker phrases that signal the crawl -> running transition.
///
/// The first three are printed by the engine once the crawl has finished; the
/// last two match the spawn-complete banners of the upstream load tooling the
/// engine is format-compatible with.
pub const CRAWL_DONE_MARKERS: [&str; 5] = [
    "URL(s) utilisees pour le test",
    "utilisees pour le test de charge",
    "Aucune URL decouverte",
    "All users spawned",
    "Spawning is complete",
];

/// Indentation used when the engine prints a discovered URL.
pub const DISCOVERED_INDENT: &str = "    ";

/// Render one discovered URL as a side-channel line, ready to print.
pub fn discovered_line(url: &str) -> String {
    format!("{DISCOVERED_INDENT}- {url}")
}

/// Extract the URL from a side-channel line, if the line is one.
///
/// Only relative paths and absolute `http(s)` URLs qualify; any other
/// `- `-prefixed text (list bullets in ordinary log output) is ignored.
pub fn parse_discovered_line(line: &str) -> Option<&str> {
    let stripped = line.trim();
    let is_discovered = stripped.starts_with("- /")
        || (stripped.starts_with("- http") && stripped.contains("://"));
    if !is_discovered {
        return None;
    }

    let url = stripped[2..].trim();
    if url.is_empty() {
        None
    } else {
        Some(url)
    }
}

/// Does this line contain one of the crawl-finished marker phrases?
pub fn is_crawl_done_marker(line: &str) -> bool {
    CRAWL_DONE_MARKERS
        .iter()
        .any(|marker| line.contains(marker))
}
