//! Lexical nginx configuration checks.
//!
//! Catches what breaks `nginx -t` at parse time: unbalanced braces,
//! unterminated directives and unclosed quotes. Directive names and
//! arguments are not interpreted.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::host::HostType;
use crate::store::tree::ROOT_CONFIG;

/// A parse error at a location inside the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// Path relative to the tree root.
    pub file: String,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[emerg] {} in {}:{}", self.message, self.file, self.line)
    }
}

#[derive(Debug)]
pub enum TreeError {
    Syntax(SyntaxError),
    Io { path: PathBuf, source: io::Error },
}

/// Check the root config and every host file of a materialized tree, in
/// path order, stopping at the first error.
pub fn check_tree(dir: &Path) -> Result<(), TreeError> {
    let mut files = Vec::new();
    if dir.join(ROOT_CONFIG).is_file() {
        files.push(ROOT_CONFIG.to_string());
    }

    for host_type in HostType::ALL {
        let type_dir = dir.join(host_type.dir_name());
        if !type_dir.is_dir() {
            continue;
        }
        let entries = fs::read_dir(&type_dir).map_err(|source| TreeError::Io {
            path: type_dir.clone(),
            source,
        })?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".conf"))
            .collect();
        names.sort();
        files.extend(names.into_iter().map(|n| format!("{}/{}", host_type.dir_name(), n)));
    }

    for file in files {
        let path = dir.join(&file);
        let content = fs::read_to_string(&path).map_err(|source| TreeError::Io { path, source })?;
        check_source(&file, &content).map_err(TreeError::Syntax)?;
    }
    Ok(())
}

/// Check one file's text. `file` is only used for the error location.
pub fn check_source(file: &str, content: &str) -> Result<(), SyntaxError> {
    let err = |line: usize, message: String| SyntaxError {
        file: file.to_string(),
        line,
        message,
    };

    let mut chars = content.chars().peekable();
    let mut line = 1;
    let mut depth = 0usize;
    // Words of the directive being read, before its `;` or `{`.
    let mut words = 0usize;
    let mut in_word = false;

    while let Some(c) = chars.next() {
        match c {
            '\n' => {
                line += 1;
                in_word = false;
            }
            c if c.is_whitespace() => in_word = false,
            '#' if !in_word => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '"' | '\'' if !in_word => {
                let quote = c;
                let start = line;
                let mut closed = false;
                while let Some(next) = chars.next() {
                    match next {
                        '\\' => {
                            if chars.next() == Some('\n') {
                                line += 1;
                            }
                        }
                        '\n' => line += 1,
                        n if n == quote => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err(err(start, format!("unterminated string starting with {}", quote)));
                }
                words += 1;
                // A closing quote must be followed by a separator; `)` closes
                // an `if` condition.
                if let Some(&next) = chars.peek() {
                    if !(next.is_whitespace() || matches!(next, ';' | '{' | '}' | ')')) {
                        return Err(err(line, format!("unexpected \"{}\"", next)));
                    }
                }
            }
            '{' => {
                if words == 0 {
                    return Err(err(line, "unexpected \"{\"".to_string()));
                }
                depth += 1;
                words = 0;
                in_word = false;
            }
            '}' => {
                if words > 0 || depth == 0 {
                    return Err(err(line, "unexpected \"}\"".to_string()));
                }
                depth -= 1;
                in_word = false;
            }
            ';' => {
                if words == 0 {
                    return Err(err(line, "unexpected \";\"".to_string()));
                }
                words = 0;
                in_word = false;
            }
            '\\' => {
                if !in_word {
                    words += 1;
                    in_word = true;
                }
                if chars.next() == Some('\n') {
                    line += 1;
                }
            }
            '$' if chars.peek() == Some(&'{') => {
                // `${name}` stays inside the current word.
                if !in_word {
                    words += 1;
                    in_word = true;
                }
                chars.next();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('\n') | None => {
                            return Err(err(line, "the closing bracket in variable is missing".to_string()))
                        }
                        Some(_) => {}
                    }
                }
            }
            _ => {
                if !in_word {
                    words += 1;
                    in_word = true;
                }
            }
        }
    }

    if words > 0 {
        return Err(err(line, "unexpected end of file, expecting \";\" or \"}\"".to_string()));
    }
    if depth > 0 {
        return Err(err(line, "unexpected end of file, expecting \"}\"".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(content: &str) -> Result<(), SyntaxError> {
        check_source("proxy_host/1.conf", content)
    }

    #[test]
    fn test_accepts_typical_server_block() {
        let content = r#"
# comment with { and ;
server {
  listen 80;
  server_name a.example b.example;
  set $server "10.0.0.2";
  if ($request_uri ~* "(<|%3C).*script.*(>|%3E)") {
    return 403;
  }
  location ~* ^.*\.(css|js)$ {
    add_header X-Path "${uri}";
    proxy_pass http://$server:8080${request_uri};
  }
}
"#;
        assert_eq!(check(content), Ok(()));
    }

    #[test]
    fn test_unexpected_open_brace() {
        let err = check("server {\n  garbage{{{\n}\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.to_string(), "[emerg] unexpected \"{\" in proxy_host/1.conf:2");
    }

    #[test]
    fn test_missing_semicolon_before_close() {
        let err = check("server {\n  listen 80\n}\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.message, "unexpected \"}\"");
    }

    #[test]
    fn test_unclosed_block() {
        let err = check("server {\n  listen 80;\n").unwrap_err();
        assert_eq!(err.message, "unexpected end of file, expecting \"}\"");
    }

    #[test]
    fn test_stray_close_and_empty_directive() {
        assert_eq!(check("}\n").unwrap_err().message, "unexpected \"}\"");
        assert_eq!(check("server { ; }\n").unwrap_err().message, "unexpected \";\"");
    }

    #[test]
    fn test_unterminated_string() {
        let err = check("server {\n  return 200 \"oops;\n}\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.starts_with("unterminated string"));
    }

    #[test]
    fn test_trailing_directive_without_terminator() {
        let err = check("listen 80").unwrap_err();
        assert_eq!(err.message, "unexpected end of file, expecting \";\" or \"}\"");
    }

    #[test]
    fn test_check_tree_reports_first_file_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("proxy_host")).unwrap();
        fs::create_dir_all(dir.path().join("stream")).unwrap();
        fs::write(dir.path().join("proxy_host/1.conf"), "server {\n}\n").unwrap();
        fs::write(dir.path().join("proxy_host/1.conf.err"), "server {\n").unwrap();
        fs::write(dir.path().join("stream/4.conf"), "server {\n").unwrap();

        match check_tree(dir.path()) {
            Err(TreeError::Syntax(e)) => assert_eq!(e.file, "stream/4.conf"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
