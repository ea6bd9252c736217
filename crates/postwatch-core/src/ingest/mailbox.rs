//! Mailbox transport
//!
//! Thin seam over the IMAP client so the pipeline can be exercised in
//! tests without a live server. The transport is synchronous; callers
//! bound fan-out at the scheduling layer instead of spawning per
//! connection.

use postwatch_common::{Error, Result};
use tracing::debug;

/// Connection parameters for one mailbox
#[derive(Clone)]
pub struct MailboxCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_ssl: bool,
    pub folder: String,
}

impl std::fmt::Debug for MailboxCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("use_ssl", &self.use_ssl)
            .field("folder", &self.folder)
            .finish()
    }
}

/// Opens sessions against a mail store
pub trait MailboxTransport: Send + Sync {
    fn connect(&self, creds: &MailboxCredentials) -> Result<Box<dyn MailboxSession>>;
}

/// One logged-in, folder-selected session
pub trait MailboxSession: Send {
    /// Sequence numbers of unseen messages in the selected folder
    fn list_unseen(&mut self) -> Result<Vec<u32>>;

    /// Full RFC 822 source of one message
    fn fetch(&mut self, id: u32) -> Result<Vec<u8>>;

    /// Flag a message as seen. Called only after its report is persisted.
    fn mark_seen(&mut self, id: u32) -> Result<()>;

    fn logout(&mut self) -> Result<()>;
}

/// IMAP-backed transport
#[derive(Debug, Default)]
pub struct ImapTransport;

impl MailboxTransport for ImapTransport {
    fn connect(&self, creds: &MailboxCredentials) -> Result<Box<dyn MailboxSession>> {
        debug!(
            host = %creds.host,
            port = creds.port,
            use_ssl = creds.use_ssl,
            "connecting to IMAP server"
        );

        let mode = if creds.use_ssl {
            imap::ConnectionMode::Tls
        } else {
            imap::ConnectionMode::Plaintext
        };
        let client = imap::ClientBuilder::new(&creds.host, creds.port)
            .mode(mode)
            .connect()
            .map_err(|e| Error::Connection(format!("IMAP connect failed: {}", e)))?;

        let mut session = client
            .login(&creds.username, &creds.password)
            .map_err(|(e, _)| Error::Connection(format!("IMAP login failed: {}", e)))?;

        if let Err(e) = session.select(&creds.folder) {
            let _ = session.logout();
            return Err(Error::Connection(format!(
                "IMAP select {} failed: {}",
                creds.folder, e
            )));
        }

        Ok(Box::new(ImapSession { session }))
    }
}

struct ImapSession {
    session: imap::Session<Box<dyn imap::ImapConnection>>,
}

impl MailboxSession for ImapSession {
    fn list_unseen(&mut self) -> Result<Vec<u32>> {
        let ids = self
            .session
            .search("UNSEEN")
            .map_err(|e| Error::Connection(format!("IMAP search failed: {}", e)))?;
        let mut ids: Vec<u32> = ids.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn fetch(&mut self, id: u32) -> Result<Vec<u8>> {
        let messages = self
            .session
            .fetch(id.to_string(), "RFC822")
            .map_err(|e| Error::Connection(format!("IMAP fetch failed: {}", e)))?;
        let body = messages
            .iter()
            .next()
            .and_then(|m| m.body())
            .ok_or_else(|| Error::Connection(format!("IMAP fetch returned no body for {}", id)))?;
        Ok(body.to_vec())
    }

    fn mark_seen(&mut self, id: u32) -> Result<()> {
        self.session
            .store(id.to_string(), "+FLAGS (\\Seen)")
            .map_err(|e| Error::Connection(format!("IMAP store failed: {}", e)))?;
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        self.session
            .logout()
            .map_err(|e| Error::Connection(format!("IMAP logout failed: {}", e)))?;
        Ok(())
    }
}
