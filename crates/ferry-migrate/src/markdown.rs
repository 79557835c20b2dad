//! Attachment links embedded in release bodies.

use crate::types::AttachmentKind;
use once_cell::sync::Lazy;
use regex::Regex;

static IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)\s]+)\)").expect("Invalid regex"));

static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)\)").expect("Invalid regex"));

const IMAGE_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp"];

/// A link found in markdown text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedLink {
    /// Link text or image alt text.
    pub text: String,
    /// Link target as written.
    pub url: String,
    /// File link or inline image.
    pub kind: AttachmentKind,
}

impl EmbeddedLink {
    /// File name taken from the last URL path segment.
    pub fn file_name(&self) -> String {
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        match path.rsplit('/').next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.text.clone(),
        }
    }
}

fn is_image_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or_default();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Images and file links in `body`, in order of first appearance, without duplicates.
///
/// Plain links pointing at image files are treated as images.
pub fn extract_links(body: &str) -> Vec<EmbeddedLink> {
    let mut found: Vec<(usize, EmbeddedLink)> = Vec::new();
    let mut image_spans = Vec::new();

    for caps in IMAGE.captures_iter(body) {
        let (Some(whole), Some(text), Some(url)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        image_spans.push(whole.range());
        found.push((
            whole.start(),
            EmbeddedLink {
                text: text.as_str().to_string(),
                url: url.as_str().to_string(),
                kind: AttachmentKind::Img,
            },
        ));
    }

    for caps in LINK.captures_iter(body) {
        let (Some(whole), Some(text), Some(url)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if image_spans.iter().any(|span| span.contains(&whole.start())) {
            continue;
        }
        let kind = if is_image_url(url.as_str()) {
            AttachmentKind::Img
        } else {
            AttachmentKind::File
        };
        found.push((
            whole.start(),
            EmbeddedLink {
                text: text.as_str().to_string(),
                url: url.as_str().to_string(),
                kind,
            },
        ));
    }

    found.sort_by_key(|(start, _)| *start);
    let mut links: Vec<EmbeddedLink> = Vec::with_capacity(found.len());
    for (_, link) in found {
        if !links.iter().any(|l| l.url == link.url) {
            links.push(link);
        }
    }
    links
}

/// Links whose URL starts with one of `prefixes`, i.e. hosted by the source platform.
pub fn hosted_links(body: &str, prefixes: &[&str]) -> Vec<EmbeddedLink> {
    extract_links(body)
        .into_iter()
        .filter(|link| prefixes.iter().any(|p| link.url.starts_with(p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "## Changes\n\
        ![screenshot](/uploads/abc/shot.png)\n\
        Download [the build](/uploads/def/app.zip) or see [docs](https://docs.example.com/guide).\n\
        Diagram: [arch](/uploads/ghi/arch.JPG)\n\
        Again [the build](/uploads/def/app.zip)\n";

    #[test]
    fn test_extracts_images_and_files_in_order() {
        let links = extract_links(BODY);
        let urls: Vec<_> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "/uploads/abc/shot.png",
                "/uploads/def/app.zip",
                "https://docs.example.com/guide",
                "/uploads/ghi/arch.JPG",
            ]
        );
        assert_eq!(links[0].kind, AttachmentKind::Img);
        assert_eq!(links[1].kind, AttachmentKind::File);
        assert_eq!(links[3].kind, AttachmentKind::Img);
    }

    #[test]
    fn test_hosted_links_filter() {
        let links = hosted_links(BODY, &["/uploads/"]);
        assert_eq!(links.len(), 3);
        assert!(links.iter().all(|l| l.url.starts_with("/uploads/")));
    }

    #[test]
    fn test_file_name() {
        let link = EmbeddedLink {
            text: "build".to_string(),
            url: "https://host/attach/files/app.tar.gz?token=1".to_string(),
            kind: AttachmentKind::File,
        };
        assert_eq!(link.file_name(), "app.tar.gz");

        let bare = EmbeddedLink {
            text: "notes".to_string(),
            url: "https://host/dir/".to_string(),
            kind: AttachmentKind::File,
        };
        assert_eq!(bare.file_name(), "notes");
    }

    #[test]
    fn test_no_links() {
        assert!(extract_links("plain text [not a link] (nope)").is_empty());
    }
}
