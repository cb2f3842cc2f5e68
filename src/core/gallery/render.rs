//! HTML documents for the share link.

use maud::{html, Markup, PreEscaped, DOCTYPE};

const CSS: &str = r#"
body { margin: 0; font-family: system-ui, sans-serif; background: #111; color: #eee; }
header { padding: 1rem 1.5rem; display: flex; justify-content: space-between; align-items: baseline; }
header a { color: #9cf; }
.status { color: #aaa; font-size: 0.9rem; }
.grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(220px, 1fr)); gap: 0.5rem; padding: 0 1.5rem 1.5rem; }
figure { margin: 0; }
figure img { width: 100%; aspect-ratio: 3 / 2; object-fit: cover; display: block; }
figcaption { font-size: 0.8rem; color: #bbb; padding: 0.25rem 0; }
.toggle { font-size: 0.75rem; margin-left: 0.5rem; cursor: pointer; }
.empty { padding: 3rem 1.5rem; text-align: center; color: #aaa; }
"#;

// Swaps an item between its original and enhanced share URL
const TOGGLE_JS: &str = r#"
document.querySelectorAll('button.toggle').forEach(function (b) {
  b.addEventListener('click', function () {
    var a = b.closest('figure').querySelector('a');
    var enhanced = a.getAttribute('href') === a.dataset.enhanced;
    a.setAttribute('href', enhanced ? a.dataset.original : a.dataset.enhanced);
    b.textContent = enhanced ? 'Show enhanced' : 'Show original';
  });
});
"#;

/// One item with its URLs resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedItem {
    pub title: String,
    /// Capture time and camera, when known
    pub caption: Option<String>,
    pub thumb_url: String,
    pub share_url: String,
    pub enhanced_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GalleryPage<'a> {
    pub session_id: &'a str,
    pub items: &'a [RenderedItem],
    pub bundle_url: Option<&'a str>,
    /// Auto-refresh interval; `None` for the final document
    pub refresh_seconds: Option<u32>,
}

fn document(title: &str, refresh_seconds: Option<u32>, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                @if let Some(seconds) = refresh_seconds {
                    meta http-equiv="refresh" content=(seconds);
                }
                title { (title) }
                style { (PreEscaped(CSS)) }
            }
            body {
                (content)
            }
        }
    }
}

/// Shown while the session is still being copied
pub fn render_placeholder(session_id: &str, poll_seconds: u32) -> String {
    let content = html! {
        header {
            h1 { (session_id) }
        }
        p.empty { "Photos are on their way. This page refreshes on its own." }
    };
    document(session_id, Some(poll_seconds), content).into_string()
}

pub fn render_gallery(page: &GalleryPage<'_>) -> String {
    let in_progress = page.refresh_seconds.is_some();
    let has_enhanced = page.items.iter().any(|i| i.enhanced_url.is_some());

    let content = html! {
        header {
            h1 { (page.session_id) }
            div.status {
                (page.items.len()) " photos"
                @if in_progress { " so far, more arriving" }
                @if let Some(url) = page.bundle_url {
                    " · "
                    a href=(url) download { "Download all" }
                }
            }
        }
        @if page.items.is_empty() {
            p.empty { "No photos yet." }
        } @else {
            main.grid {
                @for item in page.items {
                    figure {
                        a href=(item.share_url)
                            data-original=(item.share_url)
                            data-enhanced=[item.enhanced_url.as_deref()] {
                            img src=(item.thumb_url) alt=(item.title) loading="lazy";
                        }
                        figcaption {
                            (item.title)
                            @if let Some(caption) = &item.caption {
                                " · " (caption)
                            }
                            @if item.enhanced_url.is_some() {
                                button.toggle type="button" { "Show enhanced" }
                            }
                        }
                    }
                }
            }
        }
        @if has_enhanced {
            script { (PreEscaped(TOGGLE_JS)) }
        }
    };

    document(page.session_id, page.refresh_seconds, content).into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, enhanced: bool) -> RenderedItem {
        RenderedItem {
            title: title.to_string(),
            caption: Some("2024-05-01 10:15 · Canon EOS R5".to_string()),
            thumb_url: format!("https://t/{title}"),
            share_url: format!("https://s/{title}"),
            enhanced_url: enhanced.then(|| format!("https://e/{title}")),
        }
    }

    #[test]
    fn placeholder_refreshes() {
        let html = render_placeholder("shoot-x", 2);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains(r#"http-equiv="refresh" content="2""#));
    }

    #[test]
    fn final_gallery_does_not_refresh() {
        let items = [item("IMG_0001.JPG", false)];
        let html = render_gallery(&GalleryPage {
            session_id: "shoot-x",
            items: &items,
            bundle_url: Some("https://b/share.zip"),
            refresh_seconds: None,
        });
        assert!(!html.contains("http-equiv"));
        assert!(html.contains("https://t/IMG_0001.JPG"));
        assert!(html.contains("https://b/share.zip"));
        assert!(!html.contains("<button"));
    }

    #[test]
    fn progressive_gallery_refreshes() {
        let items = [item("IMG_0001.JPG", false)];
        let html = render_gallery(&GalleryPage {
            session_id: "shoot-x",
            items: &items,
            bundle_url: None,
            refresh_seconds: Some(2),
        });
        assert!(html.contains("http-equiv"));
        assert!(html.contains("more arriving"));
    }

    #[test]
    fn enhanced_items_get_a_toggle() {
        let items = [item("IMG_0001.JPG", true), item("IMG_0002.JPG", false)];
        let html = render_gallery(&GalleryPage {
            session_id: "shoot-x",
            items: &items,
            bundle_url: None,
            refresh_seconds: None,
        });
        assert!(html.contains(r#"data-enhanced="https://e/IMG_0001.JPG""#));
        assert_eq!(html.matches("Show enhanced").count(), 2);
    }

    #[test]
    fn titles_are_escaped() {
        let items = [item("<script>.JPG", false)];
        let html = render_gallery(&GalleryPage {
            session_id: "shoot-x",
            items: &items,
            bundle_url: None,
            refresh_seconds: None,
        });
        assert!(html.contains("&lt;script&gt;.JPG"));
    }
}
