use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::Error;
use harbor_http::url;
use harbor_mio::Connection;
use tracing::{event, Level};

use super::{
    listing, mime,
    response::{self, Status, HTML},
};

/// What a request target maps to under the base directory.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolved {
    File(PathBuf),
    Directory(PathBuf),
    NotFound,
    Forbidden,
}

/// Map a request path to the file system.
///
/// `base_dir` must already be canonical. The path is percent-decoded, and `/` maps to
/// `index.html`. Anything resolving outside of `base_dir`, through `..` or symlinks, is
/// forbidden.
pub fn resolve(base_dir: &Path, path: &str) -> Resolved {
    let decoded = url::decode(path);
    let relative = decoded.trim_start_matches('/');

    let candidate = if relative.is_empty() {
        base_dir.join("index.html")
    } else {
        base_dir.join(relative)
    };

    let Ok(resolved) = candidate.canonicalize() else {
        return Resolved::NotFound;
    };

    if !resolved.starts_with(base_dir) {
        return Resolved::Forbidden;
    }

    match fs::metadata(&resolved) {
        Ok(metadata) if metadata.is_dir() => Resolved::Directory(resolved),
        Ok(_) => Resolved::File(resolved),
        Err(_) => Resolved::NotFound,
    }
}

/// Serve the file, listing or error page for `path`.
pub fn serve(connection: &mut Connection, base_dir: &Path, path: &str) -> Result<(), Error> {
    match resolve(base_dir, path) {
        Resolved::File(path) => send_file(connection, base_dir, &path),
        Resolved::Directory(dir) => {
            let html = listing::render(&dir, &url::decode(path))?;
            response::send(connection, Status::Ok, HTML, html.as_bytes())
        }
        Resolved::NotFound => send_not_found(connection, base_dir),
        Resolved::Forbidden => {
            event!(Level::DEBUG, path, "rejecting path outside of base directory");
            response::send_error(connection, Status::Forbidden)
        }
    }
}

fn send_file(connection: &mut Connection, base_dir: &Path, path: &Path) -> Result<(), Error> {
    let (mut file, len) = match open_file(path) {
        Ok(opened) => opened,
        Err(error) => {
            event!(Level::DEBUG, ?path, ?error, "failed to open file");
            return send_not_found(connection, base_dir);
        }
    };

    let head = response::head(Status::Ok, mime::content_type(path), len, connection.keep_alive());
    connection.write_all(&head)?;
    io::copy(&mut file, connection)?;

    Ok(())
}

/// Open a file along with its current length.
///
/// The length comes from the open handle, so it matches what will be read even if the file was
/// replaced since it was resolved.
fn open_file(path: &Path) -> io::Result<(File, u64)> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    Ok((file, len))
}

/// Send the site's `404.html` if it has one, or a generic page.
fn send_not_found(connection: &mut Connection, base_dir: &Path) -> Result<(), Error> {
    match fs::read(base_dir.join("404.html")) {
        Ok(page) => response::send(connection, Status::NotFound, HTML, &page),
        Err(_) => response::send_error(connection, Status::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("harbor-files-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&root);

        let base = root.join("site");
        fs::create_dir_all(base.join("docs")).unwrap();
        fs::write(base.join("index.html"), b"<h1>home</h1>").unwrap();
        fs::write(base.join("docs/read me.txt"), b"hello").unwrap();
        fs::write(root.join("secret.txt"), b"secret").unwrap();

        base.canonicalize().unwrap()
    }

    #[test]
    fn root_maps_to_index() {
        let base = site("index");

        assert_eq!(resolve(&base, "/"), Resolved::File(base.join("index.html")));
    }

    #[test]
    fn percent_encoded_paths_are_decoded() {
        let base = site("decode");

        assert_eq!(
            resolve(&base, "/docs/read%20me.txt"),
            Resolved::File(base.join("docs/read me.txt"))
        );
        assert_eq!(resolve(&base, "/docs"), Resolved::Directory(base.join("docs")));
    }

    #[test]
    fn missing_files_not_found() {
        let base = site("missing");

        assert_eq!(resolve(&base, "/nope.html"), Resolved::NotFound);
        assert_eq!(resolve(&base, "/docs/nope/deeper"), Resolved::NotFound);
    }

    #[test]
    fn escaping_base_is_forbidden() {
        let base = site("escape");

        assert_eq!(resolve(&base, "/../secret.txt"), Resolved::Forbidden);
        assert_eq!(resolve(&base, "/docs/%2E%2E/%2E%2E/secret.txt"), Resolved::Forbidden);
    }

    #[test]
    fn length_follows_file_replaced_after_resolve() {
        let base = site("replaced");

        let Resolved::File(path) = resolve(&base, "/docs/read%20me.txt") else {
            panic!("file not resolved");
        };
        fs::write(&path, b"hello, longer").unwrap();

        let (_, len) = open_file(&path).unwrap();
        assert_eq!(len, 13);
    }
}
