//! Minimal blocking HTTP/1.1 server.
//!
//! Each `HttpServer` owns one listener and one route table. The accept loop
//! polls a nonblocking listener so `ServerHandle::stop` can end it, and every
//! accepted connection is served on its own thread: a streaming response may
//! run for hours and must not hold up the next client.

mod response;

pub use response::{ChunkedBody, HttpResponder};

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::error::BootstrapError;
use crate::transport::{Responder, ResponseHead};

const MAX_REQUEST_BYTES: usize = 8192;
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------------
// Requests and routes
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "POST" => Some(Method::Post),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub peer: Option<SocketAddr>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

pub type Handler =
    Arc<dyn Fn(&Request, HttpResponder<TcpStream>) -> Result<()> + Send + Sync + 'static>;

struct Route {
    method: Method,
    path: String,
    handler: Handler,
}

enum Lookup<'r> {
    Found(&'r Handler),
    MethodNotAllowed,
    NotFound,
}

/// Route table for one server.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `method` + `path`. Paths are exact matches and must
    /// start with `/`.
    pub fn register<F>(
        &mut self,
        method: Method,
        path: &str,
        handler: F,
    ) -> Result<&mut Self, BootstrapError>
    where
        F: Fn(&Request, HttpResponder<TcpStream>) -> Result<()> + Send + Sync + 'static,
    {
        if !path.starts_with('/') || path.contains('?') || path.contains(char::is_whitespace) {
            return Err(BootstrapError::InvalidPath(path.to_string()));
        }
        if self
            .routes
            .iter()
            .any(|route| route.method == method && route.path == path)
        {
            return Err(BootstrapError::DuplicateRoute {
                method: method.to_string(),
                path: path.to_string(),
            });
        }
        self.routes.push(Route {
            method,
            path: path.to_string(),
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    pub fn routes(&self) -> impl Iterator<Item = (Method, &str)> + '_ {
        self.routes
            .iter()
            .map(|route| (route.method, route.path.as_str()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn lookup(&self, method: &str, path: &str) -> Lookup<'_> {
        let method = Method::parse(method);
        let mut path_known = false;
        for route in self.routes.iter().filter(|route| route.path == path) {
            path_known = true;
            if Some(route.method) == method {
                return Lookup::Found(&route.handler);
            }
        }
        if path_known {
            Lookup::MethodNotAllowed
        } else {
            Lookup::NotFound
        }
    }
}

// ----------------------------------------------------------------------------
// Server
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Used in thread names and log lines.
    pub name: String,
    pub read_timeout: Duration,
    /// Applied to every accepted socket; a stalled client fails its writes
    /// after this long.
    pub write_timeout: Option<Duration>,
}

impl ServerOptions {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: None,
        }
    }
}

pub struct HttpServer {
    router: Router,
    options: ServerOptions,
}

impl HttpServer {
    pub fn new(router: Router, options: ServerOptions) -> Self {
        Self { router, options }
    }

    pub fn start(self, addr: SocketAddr) -> Result<ServerHandle, BootstrapError> {
        let bind_err = |source| BootstrapError::Bind { addr, source };
        let listener = TcpListener::bind(addr).map_err(bind_err)?;
        let local = listener.local_addr().map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let router = Arc::new(self.router);
        let options = self.options;
        let name = options.name.clone();
        let join = std::thread::Builder::new()
            .name(format!("{}-accept", name))
            .spawn(move || accept_loop(listener, router, options, shutdown_thread))
            .map_err(bind_err)?;

        log::info!("{} server listening on http://{}", name, local);
        Ok(ServerHandle {
            name,
            addr: local,
            shutdown,
            join: Some(join),
        })
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    name: String,
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the listener actually bound (resolves port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting connections. Connections already being served run
    /// until their client goes away.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("{} accept thread panicked", self.name))?;
        }
        log::info!("{} server on {} stopped", self.name, self.addr);
        Ok(())
    }
}

fn accept_loop(
    listener: TcpListener,
    router: Arc<Router>,
    options: ServerOptions,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let router = router.clone();
                let conn_options = options.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("{}-conn", options.name))
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, peer, &router, &conn_options) {
                            log::warn!(
                                "{} request from {} failed: {:#}",
                                conn_options.name,
                                peer,
                                err
                            );
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("{} could not spawn connection thread: {}", options.name, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                log::error!("{} accept failed: {}", options.name, err);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    router: &Router,
    options: &ServerOptions,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(options.read_timeout))?;
    stream.set_write_timeout(options.write_timeout)?;

    let mut request = read_request(&mut stream)?;
    request.peer = Some(peer);
    log::debug!(
        "{} {} {} from {}",
        options.name,
        request.method,
        request.path,
        peer
    );

    let responder = HttpResponder::new(stream);
    match router.lookup(&request.method, &request.path) {
        Lookup::Found(handler) => handler(&request, responder),
        Lookup::MethodNotAllowed => {
            responder.respond(plain(405), b"method not allowed\n")?;
            Ok(())
        }
        Lookup::NotFound => {
            responder.respond(plain(404), b"not found\n")?;
            Ok(())
        }
    }
}

fn plain(status: u16) -> ResponseHead {
    ResponseHead::new(status).header("Content-Type", "text/plain")
}

/// Read and parse a request head. The body, if any, is ignored.
pub fn read_request<R: Read>(reader: &mut R) -> Result<Request> {
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let target = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (target, None),
    };
    Ok(Request {
        method: method.to_string(),
        path: path.to_string(),
        query,
        headers,
        peer: None,
    })
}
