// src/cgi.rs
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::db::DbConn;
use crate::log::Logger;
use crate::log_warn;

/// Dynamic request hook. A POST whose target ends in `.cgi` is routed here
/// with the decoded body; the handler returns the document path to serve in
/// its place, or None to report the request as unsatisfiable.
pub trait CgiHandler: Send + Sync {
    fn invoke(&self, script: &str, body: &[u8], db: Option<&mut DbConn>) -> Option<String>;
}

/// Built-in handlers: credential login and registration backed by an
/// in-memory user table, and a music directory listing stitched into a
/// static page.
pub struct DefaultCgi {
    users: Mutex<HashMap<String, String>>,
    doc_root: PathBuf,
    logger: Arc<Logger>,
}

impl DefaultCgi {
    pub fn new(doc_root: PathBuf, logger: Arc<Logger>) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            doc_root,
            logger,
        }
    }

    pub fn with_users(
        doc_root: PathBuf,
        logger: Arc<Logger>,
        users: HashMap<String, String>,
    ) -> Self {
        Self {
            users: Mutex::new(users),
            doc_root,
            logger,
        }
    }

    fn login(&self, body: &[u8]) -> Option<String> {
        let (user, password) = parse_credentials(body)?;
        let users = self.users.lock().unwrap();
        if users.get(&user).map(String::as_str) == Some(password.as_str()) {
            Some("/welcome.html".to_string())
        } else {
            Some("/logError.html".to_string())
        }
    }

    fn register(&self, body: &[u8], db: Option<&mut DbConn>) -> Option<String> {
        let (user, password) = parse_credentials(body)?;
        let mut users = self.users.lock().unwrap();
        if users.contains_key(&user) {
            return Some("/registError.html".to_string());
        }
        users.insert(user, password);
        if let Some(db) = db {
            db.record_query();
        }
        Some("/log.html".to_string())
    }

    /// Rebuild musiclist.html from the header fragment, one list entry per
    /// file under the music directory, and the tail fragment.
    fn music_list(&self) -> Option<String> {
        let header = fs::read(self.doc_root.join("dir_header.html"));
        let tail = fs::read(self.doc_root.join("dir_tail.html"));
        let (header, tail) = match (header, tail) {
            (Ok(h), Ok(t)) => (h, t),
            _ => {
                log_warn!(self.logger, "music listing fragments missing");
                return None;
            }
        };

        let mut names = Vec::new();
        let entries = match fs::read_dir(self.doc_root.join("music")) {
            Ok(entries) => entries,
            Err(e) => {
                log_warn!(self.logger, "music directory unreadable: {}", e);
                return None;
            }
        };
        for entry in entries.flatten() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        let out = self.doc_root.join("musiclist.html");
        let mut file = match fs::File::create(&out) {
            Ok(file) => file,
            Err(e) => {
                log_warn!(self.logger, "cannot write music listing: {}", e);
                return None;
            }
        };
        let mut write = || -> std::io::Result<()> {
            file.write_all(&header)?;
            for name in &names {
                writeln!(file, "<li><a href=music/{}>{}</a></li>", name, name)?;
            }
            file.write_all(&tail)?;
            Ok(())
        };
        if let Err(e) = write() {
            log_warn!(self.logger, "cannot write music listing: {}", e);
            return None;
        }
        Some("/musiclist.html".to_string())
    }
}

impl CgiHandler for DefaultCgi {
    fn invoke(&self, script: &str, body: &[u8], db: Option<&mut DbConn>) -> Option<String> {
        match script {
            "log.cgi" => self.login(body),
            "regist.cgi" => self.register(body, db),
            "musiclist.cgi" => self.music_list(),
            _ => None,
        }
    }
}

/// Decode `user=X&password=Y` form bodies.
fn parse_credentials(body: &[u8]) -> Option<(String, String)> {
    let text = std::str::from_utf8(body).ok()?;
    let mut user = None;
    let mut password = None;
    for pair in text.trim_end().split('&') {
        let (key, value) = pair.split_once('=')?;
        match key {
            "user" => user = Some(value.to_string()),
            "password" => password = Some(value.to_string()),
            _ => {}
        }
    }
    Some((user?, password?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("minnow-cgi-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn parses_form_credentials() {
        assert_eq!(
            parse_credentials(b"user=alice&password=secret"),
            Some(("alice".to_string(), "secret".to_string()))
        );
        assert_eq!(parse_credentials(b"user=alice"), None);
        assert_eq!(parse_credentials(b"garbage"), None);
    }

    #[test]
    fn register_then_login_flow() {
        let cgi = DefaultCgi::new(scratch_root("auth"), Arc::new(Logger::disabled()));
        let mut db = DbConn::new(0);

        let page = cgi.invoke("regist.cgi", b"user=bob&password=pw", Some(&mut db));
        assert_eq!(page.as_deref(), Some("/log.html"));
        assert_eq!(db.queries(), 1);

        // Duplicate registration is refused.
        let page = cgi.invoke("regist.cgi", b"user=bob&password=other", Some(&mut db));
        assert_eq!(page.as_deref(), Some("/registError.html"));

        let page = cgi.invoke("log.cgi", b"user=bob&password=pw", None);
        assert_eq!(page.as_deref(), Some("/welcome.html"));
        let page = cgi.invoke("log.cgi", b"user=bob&password=wrong", None);
        assert_eq!(page.as_deref(), Some("/logError.html"));
        let page = cgi.invoke("log.cgi", b"user=nobody&password=pw", None);
        assert_eq!(page.as_deref(), Some("/logError.html"));
    }

    #[test]
    fn music_listing_stitches_fragments() {
        let root = scratch_root("music");
        fs::write(root.join("dir_header.html"), "<html><ul>\n").unwrap();
        fs::write(root.join("dir_tail.html"), "</ul></html>\n").unwrap();
        fs::create_dir_all(root.join("music")).unwrap();
        fs::write(root.join("music/a.mp3"), b"x").unwrap();
        fs::write(root.join("music/b.mp3"), b"x").unwrap();

        let cgi = DefaultCgi::new(root.clone(), Arc::new(Logger::disabled()));
        let page = cgi.invoke("musiclist.cgi", b"", None);
        assert_eq!(page.as_deref(), Some("/musiclist.html"));

        let listing = fs::read_to_string(root.join("musiclist.html")).unwrap();
        assert!(listing.starts_with("<html><ul>"));
        assert!(listing.contains("<li><a href=music/a.mp3>a.mp3</a></li>"));
        assert!(listing.contains("<li><a href=music/b.mp3>b.mp3</a></li>"));
        assert!(listing.trim_end().ends_with("</ul></html>"));
    }

    #[test]
    fn unknown_script_is_rejected() {
        let cgi = DefaultCgi::new(scratch_root("unknown"), Arc::new(Logger::disabled()));
        assert_eq!(cgi.invoke("evil.cgi", b"", None), None);
    }
}
