//! Per-topic instruction overrides with a process-wide default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use parley_core::write_text_atomic;

/// Raw keyed storage behind [`TopicInstructionStore`].
pub trait InstructionBackend: Send + Sync {
    fn load(&self, topic_id: u64) -> Result<Option<String>>;
    fn store(&self, topic_id: u64, instruction: &str) -> Result<()>;
}

#[derive(Debug)]
/// One `topic-<id>.txt` file per topic under a root directory.
pub struct FileInstructionBackend {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileInstructionBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, topic_id: u64) -> PathBuf {
        self.root.join(format!("topic-{topic_id}.txt"))
    }
}

impl InstructionBackend for FileInstructionBackend {
    fn load(&self, topic_id: u64) -> Result<Option<String>> {
        let path = self.path_for(topic_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(raw))
    }

    fn store(&self, topic_id: u64, instruction: &str) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("instruction store write lock is poisoned"))?;
        write_text_atomic(&self.path_for(topic_id), instruction)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryInstructionBackend {
    entries: Mutex<HashMap<u64, String>>,
}

impl InstructionBackend for InMemoryInstructionBackend {
    fn load(&self, topic_id: u64) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("in-memory instruction store is poisoned"))?;
        Ok(entries.get(&topic_id).cloned())
    }

    fn store(&self, topic_id: u64, instruction: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("in-memory instruction store is poisoned"))?;
        entries.insert(topic_id, instruction.to_string());
        Ok(())
    }
}

#[derive(Clone)]
pub struct TopicInstructionStore {
    backend: Arc<dyn InstructionBackend>,
    default_instruction: String,
}

impl TopicInstructionStore {
    pub fn new(backend: Arc<dyn InstructionBackend>, default_instruction: impl Into<String>) -> Self {
        Self {
            backend,
            default_instruction: default_instruction.into(),
        }
    }

    pub fn in_memory(default_instruction: impl Into<String>) -> Self {
        Self::new(
            Arc::new(InMemoryInstructionBackend::default()),
            default_instruction,
        )
    }

    pub fn default_instruction(&self) -> &str {
        &self.default_instruction
    }

    /// Returns the topic override, or the default when none is usable.
    pub fn get(&self, topic_id: u64) -> String {
        match self.backend.load(topic_id) {
            Ok(Some(instruction)) if !instruction.trim().is_empty() => instruction,
            Ok(Some(_)) => {
                tracing::warn!(topic_id, "ignoring empty topic instruction override");
                self.default_instruction.clone()
            }
            Ok(None) => self.default_instruction.clone(),
            Err(error) => {
                tracing::warn!(topic_id, error = %format!("{error:#}"), "failed to load topic instruction override");
                self.default_instruction.clone()
            }
        }
    }

    pub fn set(&self, topic_id: u64, instruction: &str) -> Result<()> {
        self.backend
            .store(topic_id, instruction)
            .with_context(|| format!("failed to store instruction for topic {topic_id}"))?;
        tracing::debug!(
            topic_id,
            instruction_chars = instruction.chars().count(),
            "stored topic instruction override"
        );
        Ok(())
    }
}
