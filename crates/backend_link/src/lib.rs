use std::{
    io,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::Outcome,
    protocol::{BackendCommand, BackendRequest},
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};
use tracing::{debug, warn};

/// The emulation backend as seen by the web layer: one command in, one
/// [`Outcome`] out. Transport problems are reported as outcomes too.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn call(&self, command: BackendCommand, locale: &str) -> Outcome;
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("could not connect to backend at {addr}: {source}")]
    Connect { addr: String, source: io::Error },
    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),
    #[error("backend i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("backend closed the connection without a reply")]
    Closed,
    #[error("malformed backend reply: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub token: Option<String>,
}

/// Newline-delimited JSON over TCP, one connection per command.
#[derive(Debug, Clone)]
pub struct TcpBackend {
    config: BackendConfig,
}

impl TcpBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    async fn exchange(&self, request: &BackendRequest) -> Result<Outcome, BackendError> {
        let addr = self.address();
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| BackendError::Connect {
                addr: addr.clone(),
                source,
            })?;

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        stream.write_all(&line).await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        if reader.read_line(&mut reply).await? == 0 {
            return Err(BackendError::Closed);
        }
        Ok(serde_json::from_str(reply.trim_end())?)
    }
}

#[async_trait]
impl Backend for TcpBackend {
    async fn call(&self, command: BackendCommand, locale: &str) -> Outcome {
        let name = command.name();
        let request = BackendRequest {
            command,
            locale: locale.to_string(),
            token: self.config.token.clone(),
        };

        match tokio::time::timeout(self.config.timeout, self.exchange(&request)).await {
            Ok(Ok(outcome)) => {
                debug!(command = name, ok = outcome.ok, code = %outcome.code, "backend replied");
                outcome
            }
            Ok(Err(error)) => {
                warn!(command = name, %error, "backend call failed");
                Outcome::unreachable(error)
            }
            Err(_) => {
                let error = BackendError::Timeout(self.config.timeout);
                warn!(command = name, %error, "backend call timed out");
                Outcome::unreachable(error)
            }
        }
    }
}

type Script = dyn Fn(&BackendCommand) -> Outcome + Send + Sync;

/// Backend that answers from a closure and records every command it sees.
pub struct ScriptedBackend {
    script: Box<Script>,
    calls: Mutex<Vec<BackendCommand>>,
}

impl ScriptedBackend {
    pub fn new(script: impl Fn(&BackendCommand) -> Outcome + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every command succeeds with its own name as the code.
    pub fn always_ok() -> Self {
        Self::new(|command| Outcome::success(command.name()))
    }

    pub fn calls(&self) -> Vec<BackendCommand> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn count_of(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|command| command.name() == name)
            .count()
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|command| command.is_mutating())
            .count()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn call(&self, command: BackendCommand, _locale: &str) -> Outcome {
        let outcome = (self.script)(&command);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
        outcome
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
