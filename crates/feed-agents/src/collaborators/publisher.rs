//! Static HTML publisher: renders an approved post into `post.html`.

use std::path::Path;

use async_trait::async_trait;
use feed_coordination::production::{PublishError, PublishRequest, Published, Publisher};
use tracing::info;

pub const POST_PAGE: &str = "post.html";

/// Escape text for HTML bodies and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Full page for `request`. Images are referenced relative to the folder.
pub fn render_post(request: &PublishRequest) -> String {
    let title = escape_html(&request.title);
    let mut page = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n</head>\n<body>\n<h1>{title}</h1>\n"
    );
    if request.mature {
        page.push_str("<p class=\"mature\">Mature content</p>\n");
    }
    for file in &request.files {
        let name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = escape_html(&name);
        page.push_str(&format!("<img src=\"{name}\" alt=\"{title}\">\n"));
    }
    for paragraph in request.description.split("\n\n") {
        let paragraph = paragraph.trim();
        if !paragraph.is_empty() {
            page.push_str(&format!(
                "<p>{}</p>\n",
                escape_html(paragraph).replace('\n', "<br>\n")
            ));
        }
    }
    page.push_str("</body>\n</html>\n");
    page
}

#[derive(Debug, Default, Clone)]
pub struct HtmlPublisher;

impl HtmlPublisher {
    pub fn new() -> Self {
        Self
    }

    async fn write_page(&self, folder: &Path, page: &str) -> Result<(), PublishError> {
        tokio::fs::write(folder.join(POST_PAGE), page)
            .await
            .map_err(|e| PublishError(format!("{}: {e}", folder.display())))
    }
}

#[async_trait]
impl Publisher for HtmlPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<Published, PublishError> {
        let page = render_post(request);
        self.write_page(&request.folder, &page).await?;
        let path = request.folder.join(POST_PAGE);
        info!(path = %path.display(), "Rendered post page");
        Ok(Published::Rendered(path))
    }
}

/// Leaves the approved folder as the only artifact.
#[derive(Debug, Default, Clone)]
pub struct FolderPublisher;

#[async_trait]
impl Publisher for FolderPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<Published, PublishError> {
        Ok(Published::Rendered(request.folder.clone()))
    }
}
