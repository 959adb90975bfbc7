//! Thread-safe parser pool for tree-sitter parsers
//!
//! Tree-sitter parsers are not `Sync`, so each worker thread owns one and
//! pulls requests off a shared queue. Dropping every handle to the pool
//! closes the queue and the workers exit.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use tree_sitter::{Language, Parser, Tree};

/// Languages the indexer can parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceLanguage {
    Python,
}

impl SourceLanguage {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "py" | "pyi" => Some(SourceLanguage::Python),
            _ => None,
        }
    }

    pub fn grammar(&self) -> Language {
        match self {
            SourceLanguage::Python => tree_sitter_python::LANGUAGE.into(),
        }
    }
}

/// A parsing request sent to the parser pool
#[derive(Debug, Clone)]
pub struct ParseRequest {
    pub language: SourceLanguage,
    pub path: PathBuf,
    pub content: Arc<str>,
}

/// Result of a parsing operation
#[derive(Debug)]
pub struct ParseResult {
    pub tree: Tree,
    pub path: PathBuf,
    pub content: Arc<str>,
    pub duration_ms: u64,
}

type Response = (PathBuf, Result<ParseResult>);

/// Internal message for the parser worker
struct WorkerRequest {
    request: ParseRequest,
    response_sender: Sender<Response>,
}

/// Parse `request` with an already constructed parser.
pub fn parse_with(parser: &mut Parser, request: ParseRequest) -> Result<ParseResult> {
    let started = Instant::now();
    parser
        .set_language(&request.language.grammar())
        .map_err(|e| anyhow::anyhow!("Failed to set language: {}", e))?;

    let tree = parser
        .parse(request.content.as_bytes(), None)
        .ok_or_else(|| anyhow::anyhow!("Failed to parse {}", request.path.display()))?;

    if tree.root_node().has_error() {
        tracing::debug!("{} parsed with syntax errors", request.path.display());
    }

    Ok(ParseResult {
        tree,
        path: request.path,
        content: request.content,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// Parse on the calling thread with a fresh parser.
pub fn parse_source(request: ParseRequest) -> Result<ParseResult> {
    let mut parser = Parser::new();
    parse_with(&mut parser, request)
}

/// Thread-safe parser pool
#[derive(Clone)]
pub struct ParserPool {
    sender: Sender<WorkerRequest>,
}

impl ParserPool {
    /// Create a new parser pool with the specified number of worker threads
    pub fn new(num_workers: usize) -> Self {
        let workers = num_workers.max(1);
        let (sender, receiver) = std::sync::mpsc::channel::<WorkerRequest>();
        let receiver = Arc::new(Mutex::new(receiver));

        for i in 0..workers {
            let receiver = Arc::clone(&receiver);
            std::thread::spawn(move || {
                Self::worker_thread(i, receiver);
            });
        }

        Self { sender }
    }

    fn worker_thread(worker_id: usize, receiver: Arc<Mutex<Receiver<WorkerRequest>>>) {
        tracing::debug!("Parser worker {} started", worker_id);

        let mut parser = Parser::new();

        loop {
            let next = match receiver.lock() {
                Ok(queue) => queue.recv(),
                Err(_) => {
                    tracing::warn!("Parser worker {} found the queue poisoned", worker_id);
                    break;
                }
            };
            let WorkerRequest {
                request,
                response_sender,
            } = match next {
                Ok(req) => req,
                Err(_) => {
                    tracing::debug!("Parser worker {} shutting down", worker_id);
                    break;
                }
            };

            let path = request.path.clone();
            let result = parse_with(&mut parser, request);

            if response_sender.send((path, result)).is_err() {
                tracing::warn!("Failed to send parse result back to caller");
            }
        }
    }

    /// Submit every request, then collect every response. Responses arrive
    /// in completion order, not submission order.
    pub fn parse_batch(&self, requests: Vec<ParseRequest>) -> Vec<Response> {
        let (response_sender, response_receiver) = std::sync::mpsc::channel();
        let mut submitted = 0usize;
        let mut rejected = Vec::new();

        for request in requests {
            let path = request.path.clone();
            let message = WorkerRequest {
                request,
                response_sender: response_sender.clone(),
            };
            match self.sender.send(message) {
                Ok(()) => submitted += 1,
                Err(_) => rejected.push((path, Err(anyhow::anyhow!("Parser pool is shut down")))),
            }
        }
        drop(response_sender);

        let mut responses: Vec<Response> = response_receiver.iter().take(submitted).collect();
        responses.extend(rejected);
        responses
    }
}
