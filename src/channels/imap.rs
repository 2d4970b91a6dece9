//! Minimal blocking IMAP4rev1 client over TLS.
//!
//! Covers exactly what the responder needs: LOGIN, SELECT, UID SEARCH UNSEEN,
//! UID FETCH with `BODY.PEEK[]` (fetching never sets `\Seen`), UID STORE,
//! LIST/CREATE and UID MOVE with a COPY + EXPUNGE fallback. Run it inside
//! `spawn_blocking`.
//!
//! The session is generic over the byte stream so the protocol handling can be
//! exercised without a server.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::MailboxError;

/// TLS stream used against a real server.
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Final status of a tagged command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
}

/// One untagged (`* ...`) response line, with any literals it carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Untagged {
    /// Line text without the leading `* `. Literal markers (`{n}`) stay in place.
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

/// Everything the server sent for one command.
#[derive(Debug, Clone)]
pub struct Response {
    pub untagged: Vec<Untagged>,
    pub status: Status,
    /// Text after the status word, e.g. `[TRYCREATE] Mailbox doesn't exist`.
    pub status_text: String,
}

impl Response {
    fn ensure_ok(self, command: &str) -> Result<Self, MailboxError> {
        match self.status {
            Status::Ok => Ok(self),
            Status::No | Status::Bad => Err(MailboxError::Protocol(format!(
                "{command} returned {:?}: {}",
                self.status, self.status_text
            ))),
        }
    }
}

/// A message fetched with `BODY.PEEK[]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: u32,
    pub seen: bool,
    /// Raw RFC 822 bytes.
    pub raw: Vec<u8>,
}

pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl ImapSession<TlsStream> {
    /// Open a TCP connection and wrap it in rustls with the webpki root store.
    pub fn connect_tls(host: &str, port: u16, timeout: Duration) -> Result<Self, MailboxError> {
        let connection_error = |reason: String| MailboxError::Connection {
            host: format!("{host}:{port}"),
            reason,
        };

        let tcp = TcpStream::connect((host, port)).map_err(|e| connection_error(e.to_string()))?;
        tcp.set_read_timeout(Some(timeout))
            .map_err(|e| connection_error(e.to_string()))?;
        tcp.set_write_timeout(Some(timeout))
            .map_err(|e| connection_error(e.to_string()))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| connection_error(format!("invalid server name: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| connection_error(format!("TLS setup failed: {e}")))?;

        Ok(Self::new(rustls::StreamOwned::new(conn, tcp)))
    }
}

impl<S: Read + Write> ImapSession<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        }
    }

    #[cfg(test)]
    pub(crate) fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    /// Consume the server greeting.
    pub fn read_greeting(&mut self) -> Result<(), MailboxError> {
        let (line, _) = self.read_logical_line()?;
        if line.starts_with("* OK") || line.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(MailboxError::Protocol(format!("unexpected greeting: {line}")))
        }
    }

    /// Authenticate. A `NO`/`BAD` answer is an authentication failure.
    pub fn login(&mut self, user: &str, password: &str) -> Result<(), MailboxError> {
        let response = self.command(&format!("LOGIN {} {}", quote(user), quote(password)))?;
        match response.status {
            Status::Ok => {
                debug!(user, "IMAP login succeeded");
                Ok(())
            }
            Status::No | Status::Bad => Err(MailboxError::AuthFailed {
                user: user.to_string(),
                reason: response.status_text,
            }),
        }
    }

    pub fn select(&mut self, folder: &str) -> Result<(), MailboxError> {
        self.command(&format!("SELECT {}", quote(folder)))?
            .ensure_ok("SELECT")?;
        Ok(())
    }

    /// UIDs of unseen messages in the selected folder, ascending.
    pub fn search_unseen(&mut self) -> Result<Vec<u32>, MailboxError> {
        let response = self.command("UID SEARCH UNSEEN")?.ensure_ok("UID SEARCH")?;
        let mut uids: Vec<u32> = response
            .untagged
            .iter()
            .filter_map(|u| u.text.strip_prefix("SEARCH"))
            .flat_map(|rest| rest.split_whitespace())
            .filter_map(|n| n.parse().ok())
            .collect();
        uids.sort_unstable();
        uids.dedup();
        Ok(uids)
    }

    /// Fetch flags and full body without setting `\Seen`. `None` if the UID is gone.
    pub fn fetch(&mut self, uid: u32) -> Result<Option<FetchedMessage>, MailboxError> {
        let response = self
            .command(&format!("UID FETCH {uid} (UID FLAGS BODY.PEEK[])"))?
            .ensure_ok("UID FETCH")?;

        let Some(fetch) = response
            .untagged
            .into_iter()
            .find(|u| u.text.contains(" FETCH ") && !u.literals.is_empty())
        else {
            return Ok(None);
        };

        let seen = parse_flags(&fetch.text)
            .iter()
            .any(|f| f.eq_ignore_ascii_case("\\Seen"));
        let raw = fetch.literals.into_iter().next().unwrap_or_default();
        Ok(Some(FetchedMessage { uid, seen, raw }))
    }

    pub fn mark_seen(&mut self, uid: u32) -> Result<(), MailboxError> {
        self.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Seen)"))?
            .ensure_ok("UID STORE")?;
        Ok(())
    }

    /// Create `folder` unless LIST already reports it.
    pub fn ensure_folder(&mut self, folder: &str) -> Result<(), MailboxError> {
        let listed = self
            .command(&format!("LIST \"\" {}", quote(folder)))?
            .ensure_ok("LIST")?;
        if listed.untagged.iter().any(|u| u.text.starts_with("LIST ")) {
            return Ok(());
        }

        let created = self.command(&format!("CREATE {}", quote(folder)))?;
        if created.status == Status::Ok || created.status_text.contains("[ALREADYEXISTS]") {
            debug!(folder, "IMAP folder ready");
            return Ok(());
        }
        created.ensure_ok("CREATE").map(|_| ())
    }

    /// Move a message. Falls back to COPY + `\Deleted` + EXPUNGE without the MOVE extension.
    pub fn move_to(&mut self, uid: u32, folder: &str) -> Result<(), MailboxError> {
        let target = quote(folder);
        let moved = self.command(&format!("UID MOVE {uid} {target}"))?;
        if moved.status == Status::Ok {
            return Ok(());
        }
        warn!(
            uid,
            reason = %moved.status_text,
            "UID MOVE not accepted, falling back to COPY + EXPUNGE"
        );

        self.command(&format!("UID COPY {uid} {target}"))?
            .ensure_ok("UID COPY")?;
        self.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Deleted)"))?
            .ensure_ok("UID STORE")?;
        let expunged = self.command(&format!("UID EXPUNGE {uid}"))?;
        if expunged.status != Status::Ok {
            self.command("EXPUNGE")?.ensure_ok("EXPUNGE")?;
        }
        Ok(())
    }

    pub fn logout(&mut self) -> Result<(), MailboxError> {
        self.command("LOGOUT")?;
        Ok(())
    }

    /// Send one tagged command and collect the response up to its tagged status line.
    pub fn command(&mut self, command: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let writer = self.stream.get_mut();
        writer
            .write_all(format!("{tag} {command}\r\n").as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|e| MailboxError::Protocol(format!("write failed: {e}")))?;

        let tag_prefix = format!("{tag} ");
        let mut untagged = Vec::new();
        loop {
            let (line, literals) = self.read_logical_line()?;
            if let Some(rest) = line.strip_prefix(&tag_prefix) {
                let (status_word, status_text) = rest.split_once(' ').unwrap_or((rest, ""));
                let status = match status_word.to_ascii_uppercase().as_str() {
                    "OK" => Status::Ok,
                    "NO" => Status::No,
                    "BAD" => Status::Bad,
                    other => {
                        return Err(MailboxError::Protocol(format!(
                            "unknown status {other} for {tag}"
                        )));
                    }
                };
                return Ok(Response {
                    untagged,
                    status,
                    status_text: status_text.to_string(),
                });
            }
            if let Some(text) = line.strip_prefix("* ") {
                if text.starts_with("BYE") && !command.starts_with("LOGOUT") {
                    return Err(MailboxError::Protocol(format!("server closed session: {text}")));
                }
                untagged.push(Untagged {
                    text: text.to_string(),
                    literals,
                });
            }
        }
    }

    /// Read one response line, pulling in any `{n}` literals it announces.
    fn read_logical_line(&mut self) -> Result<(String, Vec<Vec<u8>>), MailboxError> {
        let mut text = String::new();
        let mut literals = Vec::new();
        loop {
            let mut buf = Vec::new();
            let read = self
                .stream
                .read_until(b'\n', &mut buf)
                .map_err(|e| MailboxError::Protocol(format!("read failed: {e}")))?;
            if read == 0 {
                return Err(MailboxError::Protocol("connection closed by server".into()));
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\r', '\n']);
            text.push_str(line);

            let Some(len) = literal_length(line) else {
                return Ok((text, literals));
            };
            let mut literal = vec![0; len];
            self.stream
                .read_exact(&mut literal)
                .map_err(|e| MailboxError::Protocol(format!("literal read failed: {e}")))?;
            literals.push(literal);
        }
    }
}

/// `{123}` at the end of a line announces a literal of 123 bytes.
fn literal_length(line: &str) -> Option<usize> {
    let rest = line.strip_suffix('}')?;
    let open = rest.rfind('{')?;
    rest[open + 1..].parse().ok()
}

/// Flags from the `FLAGS (...)` item of a FETCH response.
fn parse_flags(text: &str) -> Vec<&str> {
    let Some(start) = text.find("FLAGS (") else {
        return Vec::new();
    };
    let rest = &text[start + "FLAGS (".len()..];
    let end = rest.find(')').unwrap_or(rest.len());
    rest[..end].split_whitespace().collect()
}

/// IMAP quoted string.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
