use crate::error::FetchError;
use crate::source::version::{select, EntryKind, ListingEntry, VersionOrder, VersionPattern};
use crate::source::{FetchStatus, Fetched, Resolved, Source, SourceContext, SourceKind};
use crate::store::paths::{get_partial_path, SaveTarget};
use async_trait::async_trait;
use std::fs::{create_dir_all, rename, File};
use std::io::{BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use suppaftp::{types::FileType, FtpError, FtpStream};
use tracing::{debug, info, warn};

/// The operations a locate-and-fetch pass needs from an FTP control session.
pub trait FtpSession: Send {
    fn cwd(&mut self, path: &str) -> Result<(), FetchError>;

    /// MLSD. Returns `Ok(None)` when the server refuses the command.
    fn list_extended(&mut self) -> Result<Option<Vec<ListingEntry>>, FetchError>;

    /// NLST.
    fn list_names(&mut self) -> Result<Vec<ListingEntry>, FetchError>;

    fn retrieve(&mut self, name: &str, writer: &mut dyn Write) -> Result<u64, FetchError>;

    fn quit(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListingMode {
    Extended,
    Plain,
}

/// Parses one MLSD line, `fact=value;fact=value; name`.
pub fn parse_mlsd_line(line: &str) -> Option<ListingEntry> {
    let (facts, name) = line.split_once(' ')?;
    let name = name.trim_end_matches(['\r', '\n']);

    if name.is_empty() {
        return None;
    }

    let mut kind = EntryKind::Unknown;
    let mut modified = None;

    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };

        match key.to_ascii_lowercase().as_str() {
            "type" => {
                kind = match value.to_ascii_lowercase().as_str() {
                    "file" => EntryKind::File,
                    "dir" => EntryKind::Dir,
                    // cdir and pdir are the listed directory and its parent
                    "cdir" | "pdir" => return None,
                    _ => EntryKind::Unknown,
                }
            }
            "modify" => modified = Some(value),
            _ => {}
        }
    }

    Some(ListingEntry::new(name, kind, modified))
}

/// Wraps a session and remembers which listing command it supports.
pub struct Lister<'a, S: FtpSession> {
    session: &'a mut S,
    mode: Option<ListingMode>,
}

impl<'a, S: FtpSession> Lister<'a, S> {
    pub fn new(session: &'a mut S) -> Self {
        Self {
            session,
            mode: None,
        }
    }

    pub fn mode(&self) -> Option<ListingMode> {
        self.mode
    }

    /// Lists the current directory keeping entries of `kind`. Plain
    /// listings carry no kind, so every name is kept.
    pub fn list(&mut self, kind: EntryKind) -> Result<Vec<ListingEntry>, FetchError> {
        let entries = match self.mode {
            Some(ListingMode::Plain) => self.session.list_names()?,
            Some(ListingMode::Extended) => match self.session.list_extended()? {
                Some(entries) => entries,
                None => {
                    warn!("server stopped accepting extended listing, using name listing");
                    self.mode = Some(ListingMode::Plain);
                    self.session.list_names()?
                }
            },
            None => match self.session.list_extended()? {
                Some(entries) => {
                    debug!("server supports extended listing");
                    self.mode = Some(ListingMode::Extended);
                    entries
                }
                None => {
                    debug!("server refused extended listing, using name listing");
                    self.mode = Some(ListingMode::Plain);
                    self.session.list_names()?
                }
            },
        };

        Ok(entries
            .into_iter()
            .filter(|entry| entry.kind == kind || entry.kind == EntryKind::Unknown)
            .collect())
    }

    pub fn session(&mut self) -> &mut S {
        self.session
    }
}

#[derive(Clone, Debug)]
pub struct FtpRequest {
    pub folder: String,
    pub folder_pattern: Option<VersionPattern>,
    pub preferred_folder_version: String,
    pub file_pattern: VersionPattern,
    pub preferred_version: String,
    pub save: SaveTarget,
}

fn join_remote(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// Walks to the matching archive and downloads it unless it is already on disk.
/// The session is closed on every outcome.
///
/// Blocking: call from a blocking worker thread.
pub fn locate_and_fetch<S: FtpSession>(
    session: &mut S,
    request: &FtpRequest,
    order: VersionOrder,
    sandbox: &Path,
    host: &str,
) -> Result<Fetched, FetchError> {
    let result = fetch_in_session(session, request, order, sandbox, host);

    session.quit();

    result
}

fn fetch_in_session<S: FtpSession>(
    session: &mut S,
    request: &FtpRequest,
    order: VersionOrder,
    sandbox: &Path,
    host: &str,
) -> Result<Fetched, FetchError> {
    session.cwd(&request.folder)?;

    let mut lister = Lister::new(session);
    let mut dir = request.folder.clone();

    if let Some(folder_pattern) = &request.folder_pattern {
        let folders = lister.list(EntryKind::Dir)?;
        let found = select(
            &folders,
            folder_pattern,
            &request.preferred_folder_version,
            order,
            &dir,
        )?;

        debug!("{}: selected folder {}", host, found.name);

        lister.session().cwd(&found.name)?;
        dir = join_remote(&dir, &found.name);
    }

    let files = lister.list(EntryKind::File)?;
    let found = select(
        &files,
        &request.file_pattern,
        &request.preferred_version,
        order,
        &dir,
    )?;

    let remote = format!("ftp://{}{}", host, join_remote(&dir, &found.name));
    let path = request.save.resolve(sandbox, &found.name);

    if path.exists() {
        info!("already downloaded: {}", path.display());

        return Ok(Fetched {
            resolved: Resolved { remote, path },
            version: found.version,
            status: FetchStatus::AlreadyPresent,
        });
    }

    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }

    info!("downloading {}", remote);

    let partial = get_partial_path(&path);

    let result = File::create(&partial).map_err(FetchError::from).and_then(|file| {
        let mut writer = BufWriter::new(file);
        let size = lister.session().retrieve(&found.name, &mut writer)?;
        writer.flush()?;
        Ok(size)
    });

    match result {
        Ok(size) => {
            rename(&partial, &path)?;
            debug!("{}: {} bytes written to {}", host, size, path.display());
        }
        Err(err) => {
            let _ = std::fs::remove_file(&partial);
            return Err(err);
        }
    }

    Ok(Fetched {
        resolved: Resolved { remote, path },
        version: found.version,
        status: FetchStatus::Downloaded,
    })
}

/// A control connection backed by `suppaftp`.
pub struct SuppaFtpSession {
    stream: FtpStream,
    limit: Duration,
}

fn ftp_error(err: FtpError) -> FetchError {
    FetchError::Transfer(err.to_string())
}

/// Connects to the first address of `host` that answers within `limit`.
fn open_socket(host: &str, port: u16, limit: Duration) -> std::io::Result<TcpStream> {
    let mut last_error = None;

    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, limit) {
            Ok(socket) => return Ok(socket),
            Err(err) => {
                debug!("{} ({}): {}", host, addr, err);
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved")
    }))
}

impl SuppaFtpSession {
    /// Opens an anonymous session. Every failure up to a completed login is
    /// `NetworkUnreachable`, so the caller can move on to another host.
    pub fn connect(host: &str, port: u16, limit: Duration) -> Result<Self, FetchError> {
        let unreachable = |message: String| FetchError::NetworkUnreachable {
            host: host.to_string(),
            message,
        };

        let socket = open_socket(host, port, limit).map_err(|err| unreachable(err.to_string()))?;

        // must be set before the greeting is read
        socket.set_read_timeout(Some(limit))?;
        socket.set_write_timeout(Some(limit))?;

        let mut stream = FtpStream::connect_with_stream(socket)
            .map_err(|err| unreachable(format!("no greeting: {}", err)))?;

        stream
            .login("anonymous", "anonymous@")
            .map_err(|err| unreachable(format!("login refused: {}", err)))?;

        debug!("logged in to {}", host);

        Ok(Self { stream, limit })
    }
}

impl FtpSession for SuppaFtpSession {
    fn cwd(&mut self, path: &str) -> Result<(), FetchError> {
        self.stream
            .cwd(path)
            .map_err(|_| FetchError::DirectoryNotFound(path.to_string()))
    }

    fn list_extended(&mut self) -> Result<Option<Vec<ListingEntry>>, FetchError> {
        match self.stream.mlsd(None) {
            Ok(lines) => Ok(Some(
                lines.iter().filter_map(|l| parse_mlsd_line(l)).collect(),
            )),
            Err(FtpError::UnexpectedResponse(response)) => {
                debug!("MLSD refused: {:?}", response.status);
                Ok(None)
            }
            Err(err) => Err(ftp_error(err)),
        }
    }

    fn list_names(&mut self) -> Result<Vec<ListingEntry>, FetchError> {
        let names = self.stream.nlst(None).map_err(ftp_error)?;

        Ok(names
            .iter()
            .map(|name| {
                // some servers prefix NLST output with the listed path
                let name = name.rsplit('/').next().unwrap_or(name);
                ListingEntry::name_only(name.trim_end())
            })
            .collect())
    }

    fn retrieve(&mut self, name: &str, writer: &mut dyn Write) -> Result<u64, FetchError> {
        self.stream
            .transfer_type(FileType::Binary)
            .map_err(ftp_error)?;

        let mut data = self.stream.retr_as_stream(name).map_err(ftp_error)?;

        data.get_ref().set_read_timeout(Some(self.limit))?;

        let size = std::io::copy(&mut data, writer)?;

        self.stream.finalize_retr_stream(data).map_err(ftp_error)?;

        Ok(size)
    }

    fn quit(&mut self) {
        if let Err(err) = self.stream.quit() {
            debug!("ftp quit failed: {}", err);
        }
    }
}

/// Fetches from the first reachable host, moving on only when a host cannot
/// be reached at all.
pub struct FtpSource {
    pub hosts: Vec<String>,
    pub port: u16,
    pub request: FtpRequest,
}

#[async_trait]
impl Source for FtpSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Ftp
    }

    async fn fetch(&self, ctx: &SourceContext) -> Result<Fetched, FetchError> {
        let mut last_error = None;

        for host in &self.hosts {
            let host = host.clone();
            let request = self.request.clone();
            let sandbox = ctx.sandbox.clone();
            let order = ctx.order;
            let port = self.port;
            let limit = ctx.ftp_timeout;

            let result = tokio::task::spawn_blocking(move || {
                let mut session = SuppaFtpSession::connect(&host, port, limit)?;
                locate_and_fetch(&mut session, &request, order, &sandbox, &host)
            })
            .await
            .map_err(|err| FetchError::Transfer(err.to_string()))?;

            match result {
                Err(err) if err.is_unreachable() => {
                    warn!("{}", err);
                    last_error = Some(err);
                }
                result => return result,
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::NetworkUnreachable {
            host: String::new(),
            message: "no ftp host configured".to_string(),
        }))
    }
}
