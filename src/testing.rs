//! In-memory serial doubles shared by unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::LinkError;
use crate::serial::{PortDriver, SerialLink};

#[derive(Debug, Clone)]
enum Step {
    Data(Vec<u8>),
    Eof,
}

/// A link that replays scripted reads, then stays silent.
#[derive(Debug)]
pub struct ScriptedLink {
    path: String,
    steps: VecDeque<Step>,
    open: bool,
    closed: Arc<Mutex<bool>>,
}

impl ScriptedLink {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            steps: VecDeque::new(),
            open: true,
            closed: Arc::default(),
        }
    }

    pub fn with_chunk(mut self, data: &[u8]) -> Self {
        self.steps.push_back(Step::Data(data.to_vec()));
        self
    }

    pub fn with_line(self, line: &str) -> Self {
        self.with_chunk(format!("{line}\n").as_bytes())
    }

    pub fn then_eof(mut self) -> Self {
        self.steps.push_back(Step::Eof);
        self
    }

    /// Shared flag that turns true once `close` ran.
    pub fn closed_flag(&self) -> Arc<Mutex<bool>> {
        self.closed.clone()
    }
}

#[async_trait]
impl SerialLink for ScriptedLink {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>, LinkError> {
        if !self.open {
            return Err(LinkError::Closed);
        }
        match self.steps.pop_front() {
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.steps.push_front(Step::Data(data.split_off(n)));
                }
                Ok(Some(n))
            }
            Some(Step::Eof) => {
                self.open = false;
                Err(LinkError::Closed)
            }
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn write(&mut self, _data: &[u8]) -> Result<(), LinkError> {
        if !self.open {
            return Err(LinkError::Closed);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
        *self.closed.lock().unwrap() = true;
    }
}

/// Driver whose ports hand out pre-built scripted links, one per open.
#[derive(Default, Clone)]
pub struct ScriptedDriver {
    ports: Arc<Mutex<Vec<String>>>,
    links: Arc<Mutex<HashMap<String, VecDeque<ScriptedLink>>>>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `path` enumerable without queuing a link (opens will fail).
    pub fn with_port(self, path: &str) -> Self {
        {
            let mut ports = self.ports.lock().unwrap();
            if !ports.iter().any(|p| p == path) {
                ports.push(path.to_string());
            }
        }
        self
    }

    /// Queue a link returned by the next open of its path.
    pub fn with_link(self, link: ScriptedLink) -> Self {
        let path = link.path.clone();
        let this = self.with_port(&path);
        this.links
            .lock()
            .unwrap()
            .entry(path)
            .or_default()
            .push_back(link);
        this
    }

    /// Queue another link after construction (e.g. for a later reconnect).
    pub fn push_link(&self, link: ScriptedLink) {
        let path = link.path.clone();
        {
            let mut ports = self.ports.lock().unwrap();
            if !ports.iter().any(|p| *p == path) {
                ports.push(path.clone());
            }
        }
        self.links
            .lock()
            .unwrap()
            .entry(path)
            .or_default()
            .push_back(link);
    }

    /// Paths passed to `open`, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl PortDriver for ScriptedDriver {
    fn enumerate(&self) -> Vec<String> {
        let mut ports = self.ports.lock().unwrap().clone();
        ports.sort();
        ports
    }

    async fn open(
        &self,
        path: &str,
        _baud_rate: u32,
        _timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, LinkError> {
        self.opened.lock().unwrap().push(path.to_string());
        let next = self
            .links
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(VecDeque::pop_front);
        match next {
            Some(link) => Ok(Box::new(link)),
            None => Err(LinkError::open(path, "no such device")),
        }
    }
}
