//! APA-style citations built from paper metadata.

use crate::output::{Citation, PaperReference};

/// `A`, `A & B`, or `A et al.`; `Unknown` without authors.
pub fn format_authors(authors: &[String]) -> String {
    match authors {
        [] => "Unknown".to_string(),
        [one] => one.clone(),
        [first, second] => format!("{} & {}", first, second),
        [first, ..] => format!("{} et al.", first),
    }
}

/// Format an APA citation:
/// `{authors} ({year|n.d.}). {title}. {journal|publisher}. {doi link|Retrieved from url}`.
pub fn format_apa(paper: &PaperReference) -> Citation {
    let year = paper
        .year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "n.d.".to_string());
    let title = if paper.title.trim().is_empty() {
        "Unknown Title"
    } else {
        paper.title.trim()
    };

    let mut apa = format!("{} ({}). {}.", format_authors(&paper.authors), year, title);

    let venue = paper
        .journal
        .as_deref()
        .filter(|j| !j.is_empty())
        .or(paper.publisher.as_deref().filter(|p| !p.is_empty()));
    if let Some(venue) = venue {
        apa.push_str(&format!(" {}.", venue));
    }

    if let Some(doi) = paper.doi.as_deref().filter(|d| !d.is_empty()) {
        apa.push_str(&format!(" https://doi.org/{}", doi));
    } else if let Some(url) = paper.url.as_deref().filter(|u| !u.is_empty()) {
        apa.push_str(&format!(" Retrieved from {}", url));
    }

    Citation {
        apa: apa.trim().to_string(),
    }
}
