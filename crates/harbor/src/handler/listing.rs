use std::{fmt::Write as _, fs, path::Path};

use anyhow::Error;
use harbor_http::url;

/// Render an HTML index of the entries in `dir`, linked relative to `url_path`.
pub fn render(dir: &Path, url_path: &str) -> Result<String, Error> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(Result::ok).collect();
    entries.sort_by_key(|entry| entry.file_name());

    let title = escape(url_path);
    let mut html = format!(
        "<html><head><title>Index of {0}</title></head><body><h1>Index of {0}</h1><hr><table>",
        title
    );

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();

        // Follows symlinks, entries that can't be inspected are left out
        let Ok(metadata) = fs::metadata(entry.path()) else {
            continue;
        };
        let suffix = if metadata.is_dir() { "/" } else { "" };

        let mut link = url_path.to_string();
        if !link.ends_with('/') {
            link.push('/');
        }
        link.push_str(&name);
        link.push_str(suffix);

        write!(
            html,
            "<tr><td><a href=\"{}\">{}{}</a></td><td>{}</td></tr>",
            url::encode(&link),
            escape(&name),
            suffix,
            metadata.len()
        )?;
    }

    html.push_str("</table><hr></body></html>");

    Ok(html)
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }

    escaped
}
